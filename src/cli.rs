//! Command-line interface definitions using clap.

use crate::output::OutputFormat;
use apkx::executor::{DEFAULT_SKIP_LOG, DEFAULT_TIMEOUT_SECS};
use apkx::extractor::DEFAULT_EXTRACTION_TIMEOUT_SECS;
use apkx::logging::{LogConfig, LogFormat};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing::Level;

/// Run tasks over many inputs, one process per task, with a hard deadline.
#[derive(Parser, Debug)]
#[command(name = "apkx")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Log format on stderr.
    #[arg(long, global = true, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program once per input line, each under a timeout.
    Run(RunArgs),

    /// Extract features from APK files with an external analyzer.
    Extract(ExtractArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Pool and output options shared by `run` and `extract`.
#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Number of concurrent workers [default: CPU count - 2].
    #[arg(short = 'j', long, env = "APKX_WORKERS")]
    pub workers: Option<usize>,

    /// File that receives inputs which timed out or crashed.
    #[arg(long, env = "APKX_SKIP_LOG", default_value = DEFAULT_SKIP_LOG)]
    pub skip_log: PathBuf,

    /// Read inputs from this file, one per line.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Seconds each input may run before it is terminated.
    #[arg(short, long, env = "APKX_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Program to run. `{}` in its arguments is replaced by the input.
    #[arg(required = true, last = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Arguments for the extract command.
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Analyzer command line; the APK path is appended as last argument.
    #[arg(short, long)]
    pub analyzer: String,

    /// Directory for cached features, one `<apk stem>.json` per APK.
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// Seconds each APK may take (at least 10).
    #[arg(short, long, env = "APKX_TIMEOUT", default_value_t = DEFAULT_EXTRACTION_TIMEOUT_SECS)]
    pub timeout: u64,

    /// APK files to analyze.
    pub apks: Vec<PathBuf>,
}

impl ExtractArgs {
    pub fn analyzer_command(&self) -> Vec<String> {
        self.analyzer.split_whitespace().map(String::from).collect()
    }
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "apkx",
            &mut std::io::stdout(),
        );
    }
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Colored table output.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Plain text output (no colors).
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

impl Cli {
    /// Logging configuration for the supervisor: flags first, then env.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::for_cli();
        let level = if self.quiet {
            Some(Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(Level::INFO),
                2 => Some(Level::DEBUG),
                _ => Some(Level::TRACE),
            }
        };
        if let Some(level) = level {
            config = config.with_filter(level.to_string().to_lowercase());
        }
        if let Some(path) = &self.log_file {
            config = config.with_file(apkx::paths::expand_tilde(path));
        }
        config = config.with_env_overrides();
        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let args = Cli::try_parse_from([
            "apkx", "run", "-j", "3", "--timeout", "7", "--", "sh", "-c", "echo {}",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.pool.workers, Some(3));
                assert_eq!(run.timeout, 7);
                assert_eq!(run.command, vec!["sh", "-c", "echo {}"]);
                assert_eq!(run.pool.format, OutputFormatArg::Table);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_program() {
        assert!(Cli::try_parse_from(["apkx", "run"]).is_err());
    }

    #[test]
    fn test_extract_command() {
        let args = Cli::try_parse_from([
            "apkx",
            "extract",
            "--analyzer",
            "python3 analyze.py --json",
            "--out-dir",
            "/features",
            "--format",
            "json",
            "a.apk",
            "b.apk",
        ])
        .unwrap();
        match args.command {
            Commands::Extract(extract) => {
                assert_eq!(
                    extract.analyzer_command(),
                    vec!["python3", "analyze.py", "--json"]
                );
                assert_eq!(extract.out_dir, Some(PathBuf::from("/features")));
                assert_eq!(extract.timeout, DEFAULT_EXTRACTION_TIMEOUT_SECS);
                assert_eq!(extract.apks.len(), 2);
                assert_eq!(extract.pool.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Extract command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Cli::try_parse_from([
            "apkx",
            "run",
            "-vv",
            "--log-format",
            "json",
            "--",
            "true",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_format, Some(LogFormat::Json));
        assert_eq!(args.log_config().filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["apkx", "-q", "-v", "run", "--", "true"]).is_err());
    }

    #[test]
    fn test_completions_command() {
        let args = Cli::try_parse_from(["apkx", "completions", "bash"]).unwrap();
        assert!(matches!(args.command, Commands::Completions(_)));
    }
}
