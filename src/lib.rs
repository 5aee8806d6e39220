//! A fixed-priority preemptive kernel core for single-core microcontrollers.
//!
//! This crate implements the book-keeping of a small real-time kernel: task
//! control blocks, a priority-ordered ready list, a tick-driven timer list,
//! and the synchronization primitives tasks use to wait on each other — bops,
//! counting semaphores with priority inheritance, and priority-ordered
//! message inboxes fed from a shared block pool.
//!
//! It does not contain any CPU-specific code. Context switching, stack frame
//! layout, and interrupt controller access are all delegated to an
//! integrator-supplied [`Port`](port::Port) implementation.
#![cfg_attr(not(test), no_std)]

pub mod bop;
pub mod error;
pub mod ids;
pub mod kernel;
pub mod klock;
pub mod message;
pub mod port;
pub mod readyqueue;
pub mod semaphore;
pub mod tcb;
pub mod timerlist;

pub use error::*;
pub use ids::*;
pub use kernel::{Kernel, RunningState, SemaFlags, TaskDesc};
pub use port::Port;
