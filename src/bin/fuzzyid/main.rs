use anyhow::{Context, Result};
use tracing::debug;

mod args;
mod cmd_compare;
mod cmd_hash;
mod cmd_lookup;
mod cmd_selftest;
mod cmd_speedtest;
mod cmd_validate;
mod util;

use args::{CommandLineArgs, GlobalArgs};

/// Set up the logging / tracing system for the application.
fn configure_tracing(global_args: &GlobalArgs) -> Result<()> {
    use tracing_log::{AsLog, LogTracer};
    use tracing_subscriber::{filter::LevelFilter, EnvFilter};

    // Set the tracing level according to the `-q`/`--quiet` and `-v`/`--verbose` options
    let level_filter = if global_args.quiet {
        LevelFilter::ERROR
    } else {
        match global_args.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    // Configure the bridge from the `log` crate to the `tracing` crate
    LogTracer::builder()
        .with_max_level(level_filter.as_log())
        .init()?;

    // Configure logging filters according to the `FUZZYID_LOG` environment variable
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("FUZZYID_LOG")
        .from_env()
        .context("Failed to parse filters from FUZZYID_LOG environment variable")?;

    // Install the global tracing subscriber
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_ansi(global_args.use_color())
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Enable or disable colored output according to the global arguments.
fn configure_color(global_args: &GlobalArgs) {
    let use_color = global_args.use_color();
    console::set_colors_enabled(use_color);
    console::set_colors_enabled_stderr(use_color);
}

/// Configure the Rayon global thread pool.
fn configure_parallelism(global_args: &GlobalArgs) -> Result<()> {
    let num_jobs = global_args.num_jobs.max(1);
    debug!("Using {num_jobs} parallel jobs");
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_jobs)
        .thread_name(|idx| format!("Matcher {idx}"))
        .build_global()
        .with_context(|| format!("Failed to configure Rayon with {num_jobs} threads"))?;
    Ok(())
}

fn try_main(args: &CommandLineArgs) -> Result<()> {
    let global_args = &args.global_args;

    configure_color(global_args);
    configure_tracing(global_args).context("Failed to initialize logging")?;
    configure_parallelism(global_args)?;

    match &args.command {
        args::Command::Hash(args) => cmd_hash::run(global_args, args),
        args::Command::Compare(args) => cmd_compare::run(global_args, args),
        args::Command::Lookup(args) => cmd_lookup::run(global_args, args),
        args::Command::SelfTest(args) => cmd_selftest::run(global_args, args),
        args::Command::SpeedTest(args) => cmd_speedtest::run(global_args, args),
        args::Command::Validate(args) => cmd_validate::run(global_args, args),
    }
}

fn main() {
    let args = &CommandLineArgs::parse_args();
    if let Err(e) = try_main(args) {
        // Use the more verbose format that includes a backtrace when running with -vv or higher,
        // otherwise use a more compact one-line error format.
        if args.global_args.verbose > 1 {
            eprintln!("Error: {e:?}");
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(2);
    }
}
