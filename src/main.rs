//! apkx - timeout-enforcing parallel task executor for APK analysis

mod cli;
mod output;
mod theme;

use anyhow::{Context, Result, bail};
use apkx::executor::{self, PoolConfig, SUBORDINATE_ARG, TaskKind};
use apkx::extractor::FeatureExtractor;
use apkx::logging::{self, LogConfig};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use theme::Themed;

use cli::{Cli, Commands, PoolArgs};
use output::ResultRow;

/// Program entry point.
///
/// A process started as a subordinate serves its one task and exits without
/// touching the command line. Otherwise the CLI is parsed and the selected
/// command runs; on error the error chain is printed and the exit code is 1.
fn main() {
    if std::env::args_os()
        .nth(1)
        .is_some_and(|arg| arg == SUBORDINATE_ARG)
    {
        logging::init(LogConfig::for_subordinate().with_env_overrides());
        executor::run_subordinate_main();
    }

    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }

    let log_config = cli.log_config();
    let log_filter = log_config.effective_filter();
    logging::init(log_config);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args, &log_filter),
        Commands::Extract(args) => cmd_extract(&cli, args, &log_filter),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Build the pool configuration shared by every command.
fn pool_config(cli: &Cli, args: &PoolArgs, timeout: u64, log_filter: &str) -> PoolConfig {
    PoolConfig::new(timeout)
        .with_workers(args.workers)
        .with_skip_log(apkx::paths::expand_tilde(&args.skip_log))
        .with_progress(!cli.quiet && !args.no_progress && std::io::stderr().is_terminal())
        .with_log_filter(Some(log_filter.to_string()))
}

/// Read inputs one per line from `path`, or from stdin when `None`.
///
/// Blank lines are skipped.
fn read_inputs(path: Option<&PathBuf>) -> Result<Vec<String>> {
    let lines: Vec<String> = match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open input file {}", path.display()))?;
            std::io::BufReader::new(file)
                .lines()
                .collect::<std::io::Result<_>>()?
        }
        None => std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()?,
    };
    Ok(lines
        .into_iter()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.trim().is_empty())
        .collect())
}

/// Print the processed/skipped summary to stderr.
fn print_summary(cli: &Cli, rows: &[ResultRow], skip_log: &std::path::Path) {
    if cli.quiet {
        return;
    }
    let without = rows.iter().filter(|row| row.value.is_none()).count();
    let with = rows.len() - without;
    eprintln!(
        "Processed {} inputs: {} with result, {} without",
        rows.len(),
        with.success(),
        if without > 0 {
            without.warning()
        } else {
            without.to_string()
        }
    );
    if without > 0 && skip_log.exists() {
        eprintln!("Timed out or crashed inputs are listed in {}", skip_log.display());
    }
}

/// Runs a program once per input under the configured timeout.
fn cmd_run(cli: &Cli, args: &cli::RunArgs, log_filter: &str) -> Result<()> {
    let (program, program_args) = args
        .command
        .split_first()
        .context("No program given")?;
    let task = TaskKind::command(program.clone(), program_args.to_vec());

    let inputs = read_inputs(args.pool.input.as_ref())?;
    let config = pool_config(cli, &args.pool, args.timeout, log_filter);

    let results: Vec<Option<String>> = executor::killer_pmap(&task, inputs.clone(), &config)?;

    let rows = output::rows(&inputs, results);
    output::print_results(&rows, args.pool.format.into(), args.pool.ascii);
    print_summary(cli, &rows, &config.skip_log);
    Ok(())
}

/// Extracts features from APKs with the configured analyzer.
fn cmd_extract(cli: &Cli, args: &cli::ExtractArgs, log_filter: &str) -> Result<()> {
    let analyzer = args.analyzer_command();
    if analyzer.is_empty() {
        bail!("The analyzer command is empty");
    }

    let apks: Vec<PathBuf> = if args.apks.is_empty() {
        read_inputs(args.pool.input.as_ref())?
            .into_iter()
            .map(PathBuf::from)
            .collect()
    } else {
        args.apks.clone()
    };

    let mut extractor = FeatureExtractor::new(analyzer);
    if let Some(dir) = &args.out_dir {
        extractor = extractor.with_out_dir(apkx::paths::expand_tilde(dir));
    }

    let config = pool_config(cli, &args.pool, args.timeout, log_filter);
    let results = extractor.extract_features(&apks, args.timeout, &config)?;

    let rows = output::rows(apks.iter().map(|p| p.display()), results);
    output::print_results(&rows, args.pool.format.into(), args.pool.ascii);
    print_summary(cli, &rows, &config.skip_log);
    Ok(())
}
