//! Frame-pointer stack walking for a stopped thread
//!
//! The walker never touches tracee memory directly: every read goes through
//! [`Tracee::read_word`], so it runs unchanged against a ptrace-stopped
//! thread or an in-memory fake.
//!
//! # Algorithm
//!
//! 1. Read the program counter and frame-base register
//! 2. Record the program counter as the innermost frame
//! 3. Read the saved frame base at `[fp]` and the return address at
//!    `[fp + word]`; the return address is the caller's program counter
//! 4. Stop at the depth limit, on the first failed read, or when the saved
//!    frame base is zero
//!
//! This relies on the conventional frame pointer layout and yields short
//! stacks for code built with `-fomit-frame-pointer`.

use crate::error::Result;
use tracing::trace;

/// Upper bound on captured frames
pub const MAX_STACK_DEPTH: usize = 512;

/// Size of a saved frame base / return address slot
pub const WORD_SIZE: u64 = std::mem::size_of::<usize>() as u64;

/// The two registers the walk starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Instruction pointer (`rip`, `eip` or `pc`)
    pub pc: u64,
    /// Frame-base register (`rbp`, `ebp` or `x29`)
    pub frame_base: u64,
}

/// A stopped thread whose registers and memory can be read
pub trait Tracee {
    fn registers(&self) -> Result<Registers>;

    fn read_word(&self, address: u64) -> Result<u64>;
}

/// Return addresses of one thread at one sampling instant, innermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<u64>,
}

impl CallStack {
    pub fn new(frames: Vec<u64>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Program counter of the thread when it was stopped
    pub fn pc(&self) -> Option<u64> {
        self.frames.first().copied()
    }
}

/// Capture the call stack of a stopped thread.
///
/// Only a failure to read the starting registers is an error; a failed
/// memory read mid-walk truncates the stack at the last good frame.
pub fn capture<T: Tracee + ?Sized>(tracee: &T, max_depth: usize) -> Result<CallStack> {
    let max_depth = max_depth.clamp(1, MAX_STACK_DEPTH);
    let regs = tracee.registers()?;

    let mut frames = Vec::with_capacity(32);
    let mut pc = regs.pc;
    let mut fp = regs.frame_base;

    loop {
        frames.push(pc);
        if frames.len() >= max_depth {
            break;
        }

        // Stack layout at fp:
        //   [fp + 0]:    saved frame base of the caller
        //   [fp + word]: return address into the caller
        let next_fp = match tracee.read_word(fp) {
            Ok(value) => value,
            Err(e) => {
                trace!("walk stopped after {} frames: {}", frames.len(), e);
                break;
            }
        };
        let next_pc = match tracee.read_word(fp.wrapping_add(WORD_SIZE)) {
            Ok(value) => value,
            Err(e) => {
                trace!("walk stopped after {} frames: {}", frames.len(), e);
                break;
            }
        };

        if next_fp == 0 {
            break;
        }

        fp = next_fp;
        pc = next_pc;
    }

    Ok(CallStack::new(frames))
}
