use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use xmlwire::{
    Cli, Config, ExchangeContext, Fault, Output, PartDescriptor, QName, ReadReport, ReadStatus,
    SchemaGrammar, SchemaLocator, SchemaSourceType, SourceHandle, StaticSchemaProvider,
    StreamDataReader, TokenCursor, ValidationOptions, VerbosityLevel,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli);
    init_tracing(&config);

    match run(&config) {
        Ok(report) => {
            let output = Output::new(config.verbosity());
            let rendered = output.render(&report, config.format);
            if !rendered.is_empty() {
                println!("{}", rendered);
            }
            if report.status.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let default_filter = match config.verbosity() {
        VerbosityLevel::Quiet => "xmlwire=error",
        VerbosityLevel::Normal => "xmlwire=warn",
        VerbosityLevel::Verbose => "xmlwire=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: &Config) -> anyhow::Result<ReadReport> {
    let started = Instant::now();

    let (grammar, schema_desc) = resolve_grammar(config)?;

    let file = std::fs::File::open(&config.file)
        .with_context(|| format!("cannot open {}", config.file.display()))?;
    let handle = SourceHandle::new(file);

    let mut exchange = ExchangeContext::new();
    exchange.set_content(handle.clone());
    if let Some(grammar) = &grammar {
        exchange.set_schema_provider(Arc::new(StaticSchemaProvider::new(Arc::clone(grammar))));
    }

    let mut reader = StreamDataReader::new();
    reader.set_validation_options(ValidationOptions {
        fail_on_warning: !config.allow_warnings,
    });
    reader.attach_exchange(exchange);

    let outcome = match TokenCursor::open(handle.clone()) {
        Ok(cursor) => {
            let part = match &config.expect {
                Some(raw) => {
                    let name = QName::parse(raw)
                        .ok_or_else(|| anyhow::anyhow!("invalid --expect name '{}'", raw))?;
                    PartDescriptor::element(name)
                }
                None => PartDescriptor::typed(QName::unqualified("payload")),
            };
            reader.read_part(&part, cursor)
        }
        Err(e) => Err(Fault::from(e)),
    };

    // Value mode already closed the source; this is an idempotent backstop
    // for the open-error path.
    let _ = handle.close();

    let status = match outcome {
        Ok(result) => ReadStatus::Valid {
            element: result
                .into_value()
                .map(|e| e.name.to_string())
                .unwrap_or_default(),
        },
        Err(fault) => ReadStatus::Fault { fault },
    };

    Ok(ReadReport {
        file: config.file.clone(),
        schema: schema_desc,
        status,
        warnings: reader.warnings().to_vec(),
        duration: started.elapsed(),
    })
}

/// An explicit --schema wins; otherwise try the document's own schema-location
/// hints. No hint at all means an unvalidated read.
fn resolve_grammar(config: &Config) -> anyhow::Result<(Option<Arc<SchemaGrammar>>, Option<String>)> {
    if let Some(path) = &config.schema {
        let grammar = SchemaGrammar::compile_file(path)
            .with_context(|| format!("cannot compile schema {}", path.display()))?;
        return Ok((Some(Arc::new(grammar)), Some(path.display().to_string())));
    }

    let locator = SchemaLocator::new();
    let references = locator
        .extract_schema_locations(&config.file)
        .with_context(|| format!("cannot scan {}", config.file.display()))?;
    match references.into_iter().next() {
        None => Ok((None, None)),
        Some(reference) => match reference.source_type {
            SchemaSourceType::Local(path) => {
                let grammar = SchemaGrammar::compile_file(&path)
                    .with_context(|| format!("cannot compile schema {}", path.display()))?;
                Ok((Some(Arc::new(grammar)), Some(path.display().to_string())))
            }
            SchemaSourceType::Remote(url) => Err(anyhow::anyhow!(
                "remote schema location {} is not supported; pass --schema with a local file",
                url
            )),
        },
    }
}
