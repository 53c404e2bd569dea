//! Sampling driver
//!
//! A session repeatedly stops every thread of the target, captures each
//! thread's call stack, resumes them and feeds the stacks into an
//! [`Aggregator`]. Once sampling is over the session loads the target's
//! symbols, merges the per-thread tables into call trees and renders them.

use crate::aggregate::Aggregator;
use crate::call_tree::CallTree;
use crate::cli::{Cli, OutputFormat};
use crate::error::Result;
use crate::process::{ProcessControl, ThreadHandle};
use crate::report::{self, JsonReport};
use crate::stack_unwind::{self, MAX_STACK_DEPTH};
use crate::symbols::SymbolResolver;
use nix::unistd::Pid;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Settings for one profiling run
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub pid: Pid,
    pub rounds: u64,
    pub interval: Duration,
    pub max_depth: usize,
    pub format: OutputFormat,
}

impl SamplerConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let interval = Duration::from_millis(cli.interval_ms);
        Self {
            pid: Pid::from_raw(cli.pid),
            rounds: rounds_for(cli.duration, interval),
            interval,
            max_depth: cli.max_depth.clamp(1, MAX_STACK_DEPTH),
            format: cli.format,
        }
    }
}

/// Number of rounds that fit in `duration_secs` at the given interval
pub fn rounds_for(duration_secs: u64, interval: Duration) -> u64 {
    let interval_us = interval.as_micros() as u64;
    if interval_us == 0 {
        return 0;
    }
    duration_secs.saturating_mul(1_000_000 / interval_us)
}

/// One profiling run against a single target process
pub struct ProfilerSession<C: ProcessControl> {
    control: C,
    config: SamplerConfig,
    aggregator: Aggregator,
    /// Loaded after sampling so libraries mapped during the run are known
    resolver: Option<SymbolResolver>,
    rounds_completed: u64,
}

impl<C: ProcessControl> ProfilerSession<C> {
    pub fn new(control: C, config: SamplerConfig) -> Self {
        Self {
            control,
            config,
            aggregator: Aggregator::new(),
            resolver: None,
            rounds_completed: 0,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn resolver(&self) -> Option<&SymbolResolver> {
        self.resolver.as_ref()
    }

    /// Read the target's mappings and symbol tables
    pub fn load_symbols(&mut self) -> Result<()> {
        self.resolver = Some(SymbolResolver::build(self.config.pid)?);
        Ok(())
    }

    pub fn set_resolver(&mut self, resolver: SymbolResolver) {
        self.resolver = Some(resolver);
    }

    /// Run every configured round, sleeping between them
    pub fn run(&mut self) -> Result<()> {
        let rounds = self.config.rounds;
        for round in 0..rounds {
            trace!("round {} of {}", round + 1, rounds);
            self.run_round()?;

            if round + 1 < rounds && !self.config.interval.is_zero() {
                std::thread::sleep(self.config.interval);
            }
        }

        debug!(
            "sampled {} rounds across {} threads",
            self.rounds_completed,
            self.aggregator.thread_count()
        );
        Ok(())
    }

    /// Stop the process and all its threads, capture one stack per thread,
    /// then let everything run again.
    ///
    /// Whatever happens mid-round, every thread attached so far is detached
    /// before returning.
    pub fn run_round(&mut self) -> Result<()> {
        let pid = self.config.pid;
        self.control.attach(pid)?;

        let mut attached = vec![pid];
        let sampled = self.sample_attached(pid, &mut attached);
        let released = self.detach_all(&attached);

        sampled?;
        released?;
        self.rounds_completed += 1;
        Ok(())
    }

    fn sample_attached(&mut self, pid: Pid, attached: &mut Vec<Pid>) -> Result<()> {
        let threads = self.control.list_threads(pid)?;

        for &tid in threads.iter().filter(|&&tid| tid != pid) {
            self.control.attach_thread(tid)?;
            attached.push(tid);
        }

        for &tid in attached.iter() {
            let handle = ThreadHandle::new(&self.control, tid);
            let stack = stack_unwind::capture(&handle, self.config.max_depth)?;
            trace!("thread {}: {} frames", tid, stack.len());
            self.aggregator.record(tid.as_raw(), &stack);
        }

        Ok(())
    }

    /// Detach sibling threads first and the leader last, carrying on past
    /// failures; the first failure is returned
    fn detach_all(&mut self, attached: &[Pid]) -> Result<()> {
        let mut first_error = None;

        for &tid in attached.iter().rev() {
            if let Err(e) = self.control.detach(tid) {
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Build a call tree per thread and write it in the configured format,
    /// threads in ascending id order. Without loaded symbols every address
    /// renders as hex.
    pub fn report<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let empty = SymbolResolver::default();
        let resolver = self.resolver.as_ref().unwrap_or(&empty);
        match self.config.format {
            OutputFormat::Text => {
                for (tid, samples) in self.aggregator.threads() {
                    let tree = CallTree::build(samples.records());
                    report::write_text(out, resolver, tid, &tree)?;
                }
            }
            OutputFormat::Json => {
                let mut json = JsonReport::new(self.config.pid.as_raw(), self.rounds_completed);
                for (tid, samples) in self.aggregator.threads() {
                    let tree = CallTree::build(samples.records());
                    json.add_thread(resolver, tid, &tree);
                }
                writeln!(out, "{}", json.to_json()?)?;
            }
        }
        Ok(())
    }
}
