//! Error taxonomy for the sampling profiler
//!
//! Every variant here is fatal for a profiling run. Recoverable conditions
//! (unreadable binaries, truncated stack walks, addresses outside any known
//! module) never surface as errors; they only reduce the fidelity of the
//! printed call tree.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Errors raised while controlling or inspecting the target process
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("No such process: {pid}")]
    NoSuchProcess { pid: i32 },

    #[error("Could not attach to {pid}: {source}")]
    AttachFailed {
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("Process {pid} could not be stopped: {reason}")]
    WaitFailed { pid: i32, reason: String },

    #[error("Could not detach from {pid}: {source}")]
    DetachFailed {
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("Cannot list threads of {pid}: {source}")]
    ThreadList {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("Thread list of {pid} is empty")]
    EmptyThreadList { pid: i32 },

    #[error("Cannot read registers of thread {tid}: {source}")]
    RegisterRead {
        tid: i32,
        #[source]
        source: Errno,
    },

    #[error("Cannot read tracee memory at 0x{address:x}: {source}")]
    MemoryRead {
        address: u64,
        #[source]
        source: Errno,
    },

    #[error("Register access is not supported on this architecture")]
    UnsupportedArch,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
