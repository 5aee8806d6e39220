//! Shared test-only platform glue.
//!
//! The kernel core never blocks internally; a blocking syscall returns only
//! once the platform has actually switched away from the caller and later
//! switched back. To exercise that honestly (not just call the bookkeeping
//! functions in sequence and hope the assertions still make sense) each
//! configured task runs on its own real OS thread, and a small dispatcher
//! lets only one of them proceed at a time, mirroring the single-core target
//! this kernel is built for.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use corvid_kernel::ids::TaskId;

/// Backs every `lock_interrupts`/`unlock_interrupts` pair with a real mutex.
///
/// `CpuLockCell`'s `Sync` impl is only sound because at most one context can
/// hold the lock at a time. On real hardware that's "interrupts disabled
/// for the duration"; here several genuine OS threads stand in for several
/// task contexts, so the exclusion has to be a real lock instead of a no-op.
pub struct GlobalLock(Mutex<()>);

impl GlobalLock {
    pub const fn new() -> Self {
        Self(Mutex::new(()))
    }

    pub fn lock(&'static self) -> usize {
        let guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        HELD_GUARD.with(|cell| *cell.borrow_mut() = Some(guard));
        0
    }

    pub fn unlock(&'static self, _saved: usize) {
        HELD_GUARD.with(|cell| {
            cell.borrow_mut().take();
        });
    }
}

thread_local! {
    static HELD_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = RefCell::new(None);
    /// The task this OS thread represents, set once at thread start. `None`
    /// on the thread driving the test itself (the "background" context).
    pub static MY_TASK: Cell<Option<TaskId>> = Cell::new(None);
}

/// Tracks which task is logically bound to the (single, simulated) CPU.
pub struct Dispatch {
    current: Mutex<Option<TaskId>>,
    cv: Condvar,
}

impl Dispatch {
    pub const fn new() -> Self {
        Self {
            current: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    pub fn set_current(&'static self, id: Option<TaskId>) {
        let mut guard = self.current.lock().unwrap();
        *guard = id;
        self.cv.notify_all();
    }

    /// Block the calling OS thread until the dispatcher says it's `expected`'s
    /// turn (or, for `expected == None`, until control has returned to the
    /// background context).
    pub fn wait_for(&'static self, expected: Option<TaskId>) {
        let guard = self.current.lock().unwrap();
        let _guard = self.cv.wait_while(guard, |cur| *cur != expected).unwrap();
    }
}

/// Spawn a thread standing in for task `id`. The thread parks until the
/// dispatcher hands it the CPU, then runs `body` — typically a sequence of
/// kernel calls ending in a blocking wait.
pub fn spawn_task<F>(dispatch: &'static Dispatch, id: TaskId, body: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(move || {
        MY_TASK.with(|cell| cell.set(Some(id)));
        dispatch.wait_for(Some(id));
        body();
    })
}
