//! Process control via ptrace
//!
//! All OS-level trace control lives here: attaching to the thread-group
//! leader and its sibling threads, reading the registers the stack walker
//! needs, peeking tracee memory and detaching again. Everything above this
//! module talks to the [`ProcessControl`] trait so the sampling loop can be
//! exercised against a fake process.

use crate::error::{ProfilerError, Result};
use crate::stack_unwind::{Registers, Tracee, WORD_SIZE};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fs;
use std::io::IoSliceMut;
use tracing::trace;

/// Trace control over a target process and its threads
pub trait ProcessControl {
    /// Attach to a process (thread-group leader) and wait until it stops
    fn attach(&mut self, pid: Pid) -> Result<()>;

    /// Attach to a non-leader thread; these report through the clone wait
    fn attach_thread(&mut self, tid: Pid) -> Result<()>;

    fn detach(&mut self, tid: Pid) -> Result<()>;

    /// Thread ids of the process; an empty or unreadable list is an error
    fn list_threads(&self, pid: Pid) -> Result<Vec<Pid>>;

    fn registers(&self, tid: Pid) -> Result<Registers>;

    fn read_word(&self, tid: Pid, address: u64) -> Result<u64>;
}

/// A single stopped thread seen through a [`ProcessControl`]
pub struct ThreadHandle<'a, C: ?Sized> {
    control: &'a C,
    tid: Pid,
}

impl<'a, C: ProcessControl + ?Sized> ThreadHandle<'a, C> {
    pub fn new(control: &'a C, tid: Pid) -> Self {
        Self { control, tid }
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }
}

impl<C: ProcessControl + ?Sized> Tracee for ThreadHandle<'_, C> {
    fn registers(&self) -> Result<Registers> {
        self.control.registers(self.tid)
    }

    fn read_word(&self, address: u64) -> Result<u64> {
        self.control.read_word(self.tid, address)
    }
}

/// [`ProcessControl`] backed by the kernel's ptrace interface
#[derive(Debug, Default, Clone, Copy)]
pub struct Ptrace;

impl Ptrace {
    pub fn new() -> Self {
        Self
    }

    fn attach_with(&self, pid: Pid, flags: Option<WaitPidFlag>) -> Result<()> {
        ptrace::attach(pid).map_err(|source| ProfilerError::AttachFailed {
            pid: pid.as_raw(),
            source,
        })?;

        let reason = match waitpid(pid, flags) {
            Ok(WaitStatus::Stopped(_, _)) => {
                trace!("attached to {}", pid);
                return Ok(());
            }
            Ok(status) => format!("unexpected wait status {:?}", status),
            Err(e) => e.to_string(),
        };

        // Never leave a half-attached thread behind
        let _ = ptrace::detach(pid, None);
        Err(ProfilerError::WaitFailed {
            pid: pid.as_raw(),
            reason,
        })
    }
}

impl ProcessControl for Ptrace {
    fn attach(&mut self, pid: Pid) -> Result<()> {
        self.attach_with(pid, Some(WaitPidFlag::WUNTRACED))
    }

    fn attach_thread(&mut self, tid: Pid) -> Result<()> {
        self.attach_with(tid, Some(WaitPidFlag::__WCLONE))
    }

    fn detach(&mut self, tid: Pid) -> Result<()> {
        ptrace::detach(tid, None).map_err(|source| ProfilerError::DetachFailed {
            pid: tid.as_raw(),
            source,
        })?;
        trace!("detached from {}", tid);
        Ok(())
    }

    fn list_threads(&self, pid: Pid) -> Result<Vec<Pid>> {
        list_threads(pid)
    }

    fn registers(&self, tid: Pid) -> Result<Registers> {
        read_registers(tid)
    }

    fn read_word(&self, tid: Pid, address: u64) -> Result<u64> {
        read_word_from_process(tid, address)
    }
}

/// Enumerate `/proc/<pid>/task`
pub fn list_threads(pid: Pid) -> Result<Vec<Pid>> {
    let task_dir = format!("/proc/{}/task", pid);
    let entries = fs::read_dir(&task_dir).map_err(|source| ProfilerError::ThreadList {
        pid: pid.as_raw(),
        source,
    })?;

    let mut tids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProfilerError::ThreadList {
            pid: pid.as_raw(),
            source,
        })?;
        if let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        {
            tids.push(Pid::from_raw(tid));
        }
    }

    if tids.is_empty() {
        return Err(ProfilerError::EmptyThreadList { pid: pid.as_raw() });
    }

    Ok(tids)
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn read_registers(tid: Pid) -> Result<Registers> {
    let regs = ptrace::getregs(tid).map_err(|source| register_error(tid, source))?;
    Ok(Registers {
        pc: regs.rip,
        frame_base: regs.rbp,
    })
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
fn read_registers(tid: Pid) -> Result<Registers> {
    let regs = ptrace::getregs(tid).map_err(|source| register_error(tid, source))?;
    Ok(Registers {
        pc: regs.eip as u32 as u64,
        frame_base: regs.ebp as u32 as u64,
    })
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
fn read_registers(tid: Pid) -> Result<Registers> {
    let regs = ptrace::getregs(tid).map_err(|source| register_error(tid, source))?;
    Ok(Registers {
        pc: regs.pc,
        frame_base: regs.regs[29],
    })
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")
)))]
fn read_registers(_tid: Pid) -> Result<Registers> {
    Err(ProfilerError::UnsupportedArch)
}

#[allow(dead_code)]
fn register_error(tid: Pid, source: Errno) -> ProfilerError {
    ProfilerError::RegisterRead {
        tid: tid.as_raw(),
        source,
    }
}

/// Read one machine word from the tracee's memory
fn read_word_from_process(tid: Pid, address: u64) -> Result<u64> {
    let mut buffer = [0u8; 8];
    let len = WORD_SIZE as usize;
    let mut local_iov = [IoSliceMut::new(&mut buffer[..len])];
    let remote_iov = [RemoteIoVec {
        base: address as usize,
        len,
    }];

    let read = process_vm_readv(tid, &mut local_iov, &remote_iov)
        .map_err(|source| ProfilerError::MemoryRead { address, source })?;
    if read != len {
        return Err(ProfilerError::MemoryRead {
            address,
            source: Errno::EFAULT,
        });
    }

    let word = if len == 8 {
        u64::from_ne_bytes(buffer)
    } else {
        let mut narrow = [0u8; 4];
        narrow.copy_from_slice(&buffer[..4]);
        u64::from(u32::from_ne_bytes(narrow))
    };
    Ok(word)
}
