use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

/// Report rendering format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Main application configuration derived from CLI
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub file: PathBuf,
    pub schema: Option<PathBuf>,
    pub expect: Option<String>,
    pub allow_warnings: bool,
    pub format: OutputFormat,
    pub verbose: bool,
    pub quiet: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            file: cli.file.clone(),
            schema: cli.schema.clone(),
            expect: cli.expect.clone(),
            allow_warnings: cli.allow_warnings,
            format: cli.format,
            verbose: cli.verbose,
            quiet: cli.quiet,
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Streaming, schema-validating XML reader
#[derive(Parser, Debug, Clone)]
#[command(name = "xmlwire")]
#[command(about = "Read an XML document through a streaming, schema-validating reader")]
#[command(version)]
pub struct Cli {
    /// XML document to read
    #[arg(help = "XML document to read")]
    pub file: PathBuf,

    /// Schema to validate against
    #[arg(
        short = 's',
        long = "schema",
        help = "Local XML Schema (.xsd); discovered from xsi schema-location hints when omitted"
    )]
    pub schema: Option<PathBuf>,

    /// Expected document element
    #[arg(
        long = "expect",
        help = "Expected document element, written as 'local' or '{namespace}local'"
    )]
    pub expect: Option<String>,

    /// Collect warnings instead of failing on them
    #[arg(
        long = "allow-warnings",
        help = "Collect schema warnings instead of treating them as errors"
    )]
    pub allow_warnings: bool,

    /// Report format
    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Report format"
    )]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}
