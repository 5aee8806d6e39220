//! A bop send against a task that isn't waiting is rejected without
//! queuing anything; a send with the wrong key leaves a waiter blocked;
//! a send with the right key wakes it.
mod harness;

use std::sync::mpsc;

use corvid_kernel::ids::{Priority, TaskId};
use corvid_kernel::kernel::{Kernel, RunningState, SemaFlags, TaskDesc};
use corvid_kernel::port::Port;
use corvid_kernel::{BopSendOutcome, BopWaitOutcome};

use harness::{spawn_task, Dispatch, GlobalLock, MY_TASK};

const NUM_TASKS: usize = 1;

fn noop_entry(_instance: usize) {}

static TASKS: [TaskDesc; NUM_TASKS] = [TaskDesc {
    name: "t",
    entry: noop_entry,
    instance: 0,
    stack_base: core::ptr::null_mut(),
    stack_size: 0,
    start_priority: Priority(50),
}];

type TestKernel = Kernel<TestPort, NUM_TASKS, 1, 2, 4>;

static KERNEL: TestKernel = TestKernel::new(&TASKS, [(0, SemaFlags::empty())], Priority(100));
static DISPATCH: Dispatch = Dispatch::new();
static LOCK: GlobalLock = GlobalLock::new();

struct TestPort;

impl Port for TestPort {
    unsafe fn lock_interrupts() -> usize {
        LOCK.lock()
    }

    unsafe fn unlock_interrupts(saved: usize) {
        LOCK.unlock(saved)
    }

    fn invoke_context_switch() {
        KERNEL.notify_switch_complete();
        let now = KERNEL.self_tid();
        DISPATCH.set_current(now);
        if let Some(me) = MY_TASK.with(|c| c.get()) {
            if now != Some(me) {
                DISPATCH.wait_for(Some(me));
            }
        }
    }

    unsafe fn prepare_stack(
        _stack_base: *mut u8,
        _stack_size: usize,
        _entry: fn(usize),
        _entry_param: usize,
        _exit_trampoline: fn() -> !,
    ) -> *mut u8 {
        core::ptr::null_mut()
    }
}

#[test]
fn bop_key_match_mismatch_and_not_waiting() {
    let t = TaskId::new(0);
    let (key_tx, key_rx) = mpsc::channel::<u16>();

    KERNEL.init();
    KERNEL.launch(t).unwrap();

    // Nobody is waiting yet: a send is rejected outright, nothing queued.
    assert_eq!(KERNEL.bop_send(t, 0).unwrap(), BopSendOutcome::TaskNotWaiting);

    let h = spawn_task(&DISPATCH, t, move || {
        let key = KERNEL.bop_get_key();
        key_tx.send(key).unwrap();
        let outcome = KERNEL.bop_waitW(Priority::LOWEST);
        assert_eq!(outcome, BopWaitOutcome::Ok);
    });

    let key = key_rx.recv().unwrap();
    // Once the only task blocks, the dispatcher has nothing left to run.
    DISPATCH.wait_for(None);
    assert_eq!(KERNEL.running_state(t), RunningState::Bop);

    assert_eq!(
        KERNEL.bop_send(t, key.wrapping_add(1)).unwrap(),
        BopSendOutcome::KeyMismatch
    );
    assert_eq!(KERNEL.running_state(t), RunningState::Bop);

    assert_eq!(KERNEL.bop_send(t, key).unwrap(), BopSendOutcome::Taken);
    h.join().unwrap();
    assert_eq!(KERNEL.running_state(t), RunningState::Ready);
}
