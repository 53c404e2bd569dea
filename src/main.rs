use anyhow::{Context, Result};
use clap::Parser;
use stacksampler::cli::Cli;
use stacksampler::process::Ptrace;
use stacksampler::session::{ProfilerSession, SamplerConfig};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` forces TRACE, otherwise
/// RUST_LOG decides
fn init_tracing(debug: bool) {
    let mut filter = EnvFilter::from_default_env();
    if debug {
        filter = filter.add_directive(tracing::Level::TRACE.into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = SamplerConfig::from_cli(&args);
    let pid = config.pid;

    eprintln!(
        "[stacksampler: sampling {} every {}ms for {} rounds]",
        pid,
        config.interval.as_millis(),
        config.rounds
    );

    let mut session = ProfilerSession::new(Ptrace::new(), config);
    session
        .run()
        .with_context(|| format!("Sampling process {} failed", pid))?;

    // Libraries mapped while sampling ran are only known now
    session
        .load_symbols()
        .with_context(|| format!("Cannot load symbols of process {}", pid))?;

    eprintln!(
        "[stacksampler: {} rounds, {} threads]",
        session.rounds_completed(),
        session.aggregator().thread_count()
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    session.report(&mut out)?;

    Ok(())
}
