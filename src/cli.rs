//! CLI argument parsing for stacksampler

use clap::{Parser, ValueEnum};

/// Output format for the call tree report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented, human-readable call tree (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "stacksampler")]
#[command(version)]
#[command(about = "Sampling call-stack profiler for running Linux processes", long_about = None)]
pub struct Cli {
    /// Process ID to sample
    #[arg(value_name = "PID")]
    pub pid: i32,

    /// How long to sample, in whole seconds
    #[arg(value_name = "SECONDS")]
    pub duration: u64,

    /// Delay between sampling rounds in milliseconds (1-1000)
    #[arg(
        long = "interval-ms",
        value_name = "MS",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..=1000)
    )]
    pub interval_ms: u64,

    /// Maximum number of frames captured per stack (1-512)
    #[arg(long = "max-depth", value_name = "N", default_value = "512")]
    pub max_depth: usize,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
