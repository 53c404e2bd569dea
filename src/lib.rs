//! stacksampler - sampling call-stack profiler for running Linux processes
//!
//! This library periodically stops every thread of a target process with
//! ptrace, walks each thread's frame-pointer chain, counts how often every
//! call path was seen and renders the result as a symbolicated call tree
//! per thread.

pub mod aggregate;
pub mod call_tree;
pub mod cli;
pub mod error;
pub mod maps;
pub mod object_symbols;
pub mod process;
pub mod report;
pub mod session;
pub mod stack_unwind;
pub mod symbols;
