//! The kernel facade: ties the ready list, timer list, message pool,
//! semaphores, and bops together behind one generic `Kernel` type, and
//! implements task lifecycle (spec component C7) and the tick handler
//! (spec component C8).
use core::marker::PhantomData;

use crate::bop::{self, BopSendResult};
use crate::error::*;
use crate::ids::{BlockId, Priority, SemaId, TaskId};
use crate::klock::{with_cpu_lock, CpuLockCell};
use crate::message::{self, MsgBlock, MsgFields, PoolRoots};
use crate::port::Port;
use crate::readyqueue::{self, ReadyList};
use crate::semaphore::{self, SemaCb};
pub use crate::semaphore::SemaFlags;
use crate::tcb::{BlockFlags, Notifications, Statuses, TaskCb};
pub use crate::tcb::TaskAttr as TaskDesc;
use crate::timerlist::{self, TimerList};

/// A task's combined block/status state, as returned by [`Kernel::running_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    NotLaunched,
    Asleep,
    Bop,
    BopTimeout,
    Msg,
    MsgTimeout,
    Sema,
    SemaTimeout,
    Ready,
}

struct Inner<
    const NUM_TASKS: usize,
    const NUM_SEMA: usize,
    const NUM_MSG_PRI: usize,
    const NUM_MSG_BLOCKS: usize,
> {
    tasks: [TaskCb<NUM_MSG_PRI>; NUM_TASKS],
    semas: [SemaCb; NUM_SEMA],
    blocks: [MsgBlock; NUM_MSG_BLOCKS],
    pool: PoolRoots,
    running: Option<TaskId>,
    ready: ReadyList,
    timers: TimerList,
    tick_count: u32,
    bop_key_seed: u16,
    msg_purge_count: u32,
}

/// The kernel core, generic over the platform [`Port`] and the statically
/// configured table sizes.
pub struct Kernel<
    P: Port,
    const NUM_TASKS: usize,
    const NUM_SEMA: usize,
    const NUM_MSG_PRI: usize,
    const NUM_MSG_BLOCKS: usize,
> {
    inner: CpuLockCell<Inner<NUM_TASKS, NUM_SEMA, NUM_MSG_PRI, NUM_MSG_BLOCKS>>,
    attrs: &'static [TaskDesc; NUM_TASKS],
    nominal_priority: Priority,
    _port: PhantomData<P>,
}

impl<
        P: Port,
        const NUM_TASKS: usize,
        const NUM_SEMA: usize,
        const NUM_MSG_PRI: usize,
        const NUM_MSG_BLOCKS: usize,
    > Kernel<P, NUM_TASKS, NUM_SEMA, NUM_MSG_PRI, NUM_MSG_BLOCKS>
{
    /// Build a new kernel instance. `sema_init` gives each semaphore's
    /// starting count and flags. `nominal_priority` is the priority level
    /// the ready-list fast path special-cases.
    pub const fn new(
        attrs: &'static [TaskDesc; NUM_TASKS],
        sema_init: [(u32, SemaFlags); NUM_SEMA],
        nominal_priority: Priority,
    ) -> Self {
        let mut semas = [SemaCb::INIT; NUM_SEMA];
        let mut i = 0;
        while i < NUM_SEMA {
            semas[i] = SemaCb::new(sema_init[i].0, sema_init[i].1);
            i += 1;
        }
        Self {
            inner: CpuLockCell::new(Inner {
                tasks: [TaskCb::INIT; NUM_TASKS],
                semas,
                blocks: [MsgBlock::INIT; NUM_MSG_BLOCKS],
                pool: PoolRoots::INIT,
                running: None,
                ready: ReadyList::INIT,
                timers: TimerList::INIT,
                tick_count: 0,
                bop_key_seed: 0,
                msg_purge_count: 0,
            }),
            attrs,
            nominal_priority,
            _port: PhantomData,
        }
    }

    /// Must be called exactly once before any other API, typically from the
    /// platform's boot code.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn init(&self) {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            message::pool_init(&mut inner.blocks, &mut inner.pool);
            for (i, t) in inner.tasks.iter_mut().enumerate() {
                t.priority = self.attrs[i].start_priority;
            }
        });
    }

    #[inline]
    fn finish(&self, switch_needed: bool) {
        if switch_needed {
            P::invoke_context_switch();
        }
        P::secondary_context_switch();
    }

    /// Called by the platform once it has actually switched the CPU to
    /// whichever task is now at the head of the ready list. Until this is
    /// called, [`Self::self_tid`] keeps returning the previously-running
    /// task, exactly as a real context-switch trampoline would leave the
    /// "current task" pointer unchanged until the switch physically
    /// completes.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn notify_switch_complete(&self) {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.running = inner.ready.head;
        });
    }

    /// The task currently bound to the CPU, or `None` for the background context.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn self_tid(&self) -> Option<TaskId> {
        with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).running)
    }

    // ---------------------------------------------------------------
    // Task lifecycle (C7)
    // ---------------------------------------------------------------

    /// Launch task `tid`: reset its control block, construct its initial
    /// stack frame, and make it ready.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn launch(&self, tid: TaskId) -> Result<(), BadParamError> {
        if tid.index() >= NUM_TASKS {
            return Err(BadParamError::BadTaskId);
        }
        let attr = &self.attrs[tid.index()];
        let exit_trampoline: fn() -> ! = exit_trampoline_stub;
        // Safety: `attr.stack_base`/`stack_size` describe memory reserved
        // for this task by the integrator for its whole lifetime.
        let sp = unsafe {
            P::prepare_stack(
                attr.stack_base,
                attr.stack_size,
                attr.entry,
                attr.instance,
                exit_trampoline,
            )
        };
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let t = &mut inner.tasks[tid.index()];
            *t = TaskCb::INIT;
            t.priority = attr.start_priority;
            t.stack_ptr = sp;
            t.block_flags = BlockFlags::empty();
            readyqueue::add(&mut inner.tasks, &mut inner.ready, tid, self.nominal_priority)
        });
        self.finish(switch_needed);
        Ok(())
    }

    /// Called when the currently running task's entry function returns.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn exit_current(&self) {
        let Some(me) = self.self_tid() else {
            return P::contract_failure(file!(), line!());
        };
        self.msg_drain(0);
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            if inner.tasks[me.index()]
                .statuses
                .contains(Statuses::INVERSION_PRIORITIZED)
            {
                self.release_inversion(inner, me);
            }
            self.msg_drain_locked(inner, me, 0);
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::NOT_LAUNCHED;
            true
        });
        self.finish(switch_needed);
    }

    /// Forcibly terminate `tid`, releasing whatever it holds and draining
    /// its inbox. Requires the `task_kill` feature.
    #[cfg(feature = "task_kill")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn kill(&self, tid: TaskId) -> Result<(), BadParamError> {
        if tid.index() >= NUM_TASKS {
            return Err(BadParamError::BadTaskId);
        }
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            if inner.tasks[tid.index()]
                .block_flags
                .contains(BlockFlags::SEMA)
            {
                if let Some(sema_id) = inner.tasks[tid.index()].sema_block {
                    semaphore::remove_waiter(&mut inner.tasks, &mut inner.semas[sema_id.index()], tid);
                }
            }
            if inner.tasks[tid.index()].is_ready() || inner.tasks[tid.index()].block_flags.contains(BlockFlags::SEMA) {
                readyqueue::delete(&mut inner.tasks, &mut inner.ready, tid);
            }
            timerlist::purge(&mut inner.tasks, &mut inner.timers, tid);
            if inner.tasks[tid.index()]
                .statuses
                .contains(Statuses::INVERSION_PRIORITIZED)
            {
                self.release_inversion(inner, tid);
            }
            self.msg_drain_locked(inner, tid, 0);
            inner.tasks[tid.index()].block_flags = BlockFlags::NOT_LAUNCHED;
            Some(tid) == inner.ready.head || inner.running == Some(tid)
        });
        self.finish(switch_needed);
        Ok(())
    }

    /// Map a task's block/status bits to a single descriptive state.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn running_state(&self, tid: TaskId) -> RunningState {
        with_cpu_lock::<P, _>(|cs| {
            let t = &self.inner.get_mut(cs).tasks[tid.index()];
            let timed = t.statuses.contains(Statuses::TIMER_RUNNING);
            if t.block_flags.contains(BlockFlags::NOT_LAUNCHED) {
                RunningState::NotLaunched
            } else if t.block_flags.contains(BlockFlags::ASLEEP) {
                RunningState::Asleep
            } else if t.block_flags.contains(BlockFlags::BOP) {
                if timed {
                    RunningState::BopTimeout
                } else {
                    RunningState::Bop
                }
            } else if t.block_flags.contains(BlockFlags::MSG) {
                if timed {
                    RunningState::MsgTimeout
                } else {
                    RunningState::Msg
                }
            } else if t.block_flags.contains(BlockFlags::SEMA) {
                if timed {
                    RunningState::SemaTimeout
                } else {
                    RunningState::Sema
                }
            } else {
                RunningState::Ready
            }
        })
    }

    /// The priority `tid` is currently running (or waiting) at, including
    /// any temporary boost from [`Self::prioritize`] or priority
    /// inheritance.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn task_priority_get(&self, tid: TaskId) -> Priority {
        with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).tasks[tid.index()].priority)
    }

    /// Change `tid`'s priority, re-sorting it in whatever list it currently
    /// occupies.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn change_priority(&self, tid: TaskId, new: Priority) -> Result<(), BadParamError> {
        if !new.is_valid_task_priority() {
            return Err(BadParamError::BadPriority);
        }
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            if inner.tasks[tid.index()].is_ready() {
                readyqueue::delete(&mut inner.tasks, &mut inner.ready, tid);
                inner.tasks[tid.index()].priority = new;
                readyqueue::add(&mut inner.tasks, &mut inner.ready, tid, self.nominal_priority)
            } else {
                inner.tasks[tid.index()].priority = new;
                false
            }
        });
        self.finish(switch_needed);
        Ok(())
    }

    /// Rotate the caller to the end of its own priority band, if any other
    /// task at the same priority is ready.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn yield_now(&self) {
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let Some(me) = inner.running else { return false };
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            readyqueue::add(&mut inner.tasks, &mut inner.ready, me, self.nominal_priority)
        });
        self.finish(switch_needed);
    }

    /// Temporarily raise the caller to [`Priority::GUARANTEED_HIGHEST`].
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn prioritize(&self) {
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let Some(me) = inner.running else { return false };
            inner.tasks[me.index()].priority_restore_prioritized = inner.tasks[me.index()].priority;
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].priority = Priority::GUARANTEED_HIGHEST;
            readyqueue::add(&mut inner.tasks, &mut inner.ready, me, self.nominal_priority)
        });
        self.finish(switch_needed);
    }

    /// Restore the priority saved by [`Self::prioritize`].
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn unprioritize(&self) {
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let Some(me) = inner.running else { return false };
            let restore = inner.tasks[me.index()].priority_restore_prioritized;
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].priority = restore;
            readyqueue::add(&mut inner.tasks, &mut inner.ready, me, self.nominal_priority)
        });
        self.finish(switch_needed);
    }

    /// Block the caller for `ticks` ticks. Returns `true` if the sleep ended
    /// early because of an abort message rather than the full timeout.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sleep(&self, ticks: u32, abort_pri: Priority) -> bool {
        if ticks == 0 {
            return false;
        }
        let Some(me) = self.self_tid() else {
            P::contract_failure(file!(), line!());
        };
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.tasks[me.index()].notifications = Notifications::empty();
            inner.tasks[me.index()].abort_message_priority = abort_pri;
            timerlist::add(&mut inner.tasks, &mut inner.timers, me, ticks);
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::ASLEEP;
        });
        self.finish(true);

        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            timerlist::purge(&mut inner.tasks, &mut inner.timers, me);
            inner.tasks[me.index()]
                .notifications
                .contains(Notifications::UNBLOCKED_BY_MSG_SEND)
        })
    }

    // ---------------------------------------------------------------
    // Priority inheritance helper, shared by exit/kill/release
    // ---------------------------------------------------------------

    fn release_inversion(
        &self,
        inner: &mut Inner<NUM_TASKS, NUM_SEMA, NUM_MSG_PRI, NUM_MSG_BLOCKS>,
        who: TaskId,
    ) -> bool {
        inner.tasks[who.index()]
            .statuses
            .remove(Statuses::INVERSION_PRIORITIZED);
        let restore = inner.tasks[who.index()].priority_restore_inversion;
        if inner.tasks[who.index()].is_ready() {
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, who);
            inner.tasks[who.index()].priority = restore;
            readyqueue::add(&mut inner.tasks, &mut inner.ready, who, self.nominal_priority)
        } else {
            inner.tasks[who.index()].priority = restore;
            false
        }
    }

    // ---------------------------------------------------------------
    // Bop (C5)
    // ---------------------------------------------------------------

    /// From a task context, mint and remember a fresh key. From the
    /// background context, hand back the last key issued without advancing
    /// the generator: there is no TCB to remember a new one in, and the
    /// background context never actually waits on it.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_get_key(&self) -> u16 {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let Some(me) = inner.running else {
                return bop::current_key(inner.bop_key_seed);
            };
            let key = bop::next_key(&mut inner.bop_key_seed);
            inner.tasks[me.index()].bop_key = key;
            key
        })
    }

    fn bop_wait_prepare(&self, abort_pri: Priority) -> Option<TaskId> {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let me = inner.running?;
            inner.tasks[me.index()].notifications = Notifications::empty();
            inner.tasks[me.index()].abort_message_priority = abort_pri;
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::BOP;
            Some(me)
        })
    }

    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_waitW(&self, abort_pri: Priority) -> BopWaitOutcome {
        let Some(me) = self.bop_wait_prepare(abort_pri) else {
            return BopWaitOutcome::Ok;
        };
        self.finish(true);
        with_cpu_lock::<P, _>(|cs| {
            let t = &self.inner.get_mut(cs).tasks[me.index()];
            if t.notifications.contains(Notifications::UNBLOCKED_BY_MSG_SEND) {
                BopWaitOutcome::AbortedByMessage
            } else {
                BopWaitOutcome::Ok
            }
        })
    }

    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_waitT(&self, abort_pri: Priority, timeout: u32) -> BopWaitOutcome {
        if timeout == 0 {
            return BopWaitOutcome::Timeout;
        }
        let Some(me) = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let me = inner.running?;
            inner.tasks[me.index()].notifications = Notifications::empty();
            inner.tasks[me.index()].abort_message_priority = abort_pri;
            timerlist::add(&mut inner.tasks, &mut inner.timers, me, timeout);
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::BOP;
            Some(me)
        }) else {
            return BopWaitOutcome::Ok;
        };
        self.finish(true);
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            timerlist::purge(&mut inner.tasks, &mut inner.timers, me);
            let t = &inner.tasks[me.index()];
            if t.notifications.contains(Notifications::TIMEOUT) {
                BopWaitOutcome::Timeout
            } else if t.notifications.contains(Notifications::UNBLOCKED_BY_MSG_SEND) {
                BopWaitOutcome::AbortedByMessage
            } else {
                BopWaitOutcome::Ok
            }
        })
    }

    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_send(&self, tid: TaskId, key: u16) -> Result<BopSendOutcome, BadParamError> {
        self.bop_send_inner(tid, key, false)
    }

    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_send_with_key_override(&self, tid: TaskId) -> Result<BopSendOutcome, BadParamError> {
        self.bop_send_inner(tid, 0, true)
    }

    fn bop_send_inner(&self, tid: TaskId, key: u16, override_key: bool) -> Result<BopSendOutcome, BadParamError> {
        if tid.index() >= NUM_TASKS {
            return Err(BadParamError::BadTaskId);
        }
        let (outcome, switch_needed) = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            match bop::send_core(&mut inner.tasks, tid.index(), key, override_key) {
                BopSendResult::Taken => {
                    let sw = readyqueue::add(&mut inner.tasks, &mut inner.ready, tid, self.nominal_priority);
                    (BopSendOutcome::Taken, sw)
                }
                BopSendResult::TakenButLocked => (BopSendOutcome::Taken, false),
                BopSendResult::KeyMismatch => (BopSendOutcome::KeyMismatch, false),
                BopSendResult::TaskNotWaiting => (BopSendOutcome::TaskNotWaiting, false),
            }
        });
        self.finish(switch_needed);
        Ok(outcome)
    }

    /// Defer a waiter's wakeup until [`Self::bop_unlock_waiter`] is called,
    /// even if a matching `send` or a timeout arrives in the meantime.
    #[cfg(feature = "bop_lock")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_lock_waiter(&self, tid: TaskId) {
        with_cpu_lock::<P, _>(|cs| {
            self.inner.get_mut(cs).tasks[tid.index()]
                .statuses
                .insert(Statuses::BOP_LOCKED);
        });
    }

    #[cfg(feature = "bop_lock")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn bop_unlock_waiter(&self, tid: TaskId) {
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.tasks[tid.index()].statuses.remove(Statuses::BOP_LOCKED);
            if !inner.tasks[tid.index()].block_flags.contains(BlockFlags::BOP) {
                readyqueue::add(&mut inner.tasks, &mut inner.ready, tid, self.nominal_priority)
            } else {
                false
            }
        });
        self.finish(switch_needed);
    }

    // ---------------------------------------------------------------
    // Semaphore (C6)
    // ---------------------------------------------------------------

    #[cfg(feature = "semaphore")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sema_count_get(&self, sema: SemaId) -> u32 {
        with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).semas[sema.index()].count)
    }

    #[cfg(feature = "semaphore")]
    fn sema_get_prepare(&self, sema: SemaId, abort_pri: Priority) -> Result<Option<TaskId>, SemaGetOutcome> {
        let result = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let Some(me) = inner.running else {
                return Err(());
            };
            inner.tasks[me.index()].sema_block = Some(sema);
            if inner.semas[sema.index()].count > 0 {
                inner.semas[sema.index()].count -= 1;
                inner.semas[sema.index()].owner = Some(me);
                return Ok(None);
            }
            inner.tasks[me.index()].notifications = Notifications::empty();
            inner.tasks[me.index()].abort_message_priority = abort_pri;
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::SEMA;
            semaphore::insert_waiter(&mut inner.tasks, &mut inner.semas[sema.index()], me);

            if inner.semas[sema.index()].flags.contains(SemaFlags::PREVENT_PRI_INV) {
                if let Some(owner) = inner.semas[sema.index()].owner {
                    if inner.tasks[owner.index()].priority > inner.tasks[me.index()].priority {
                        inner.tasks[owner.index()]
                            .statuses
                            .insert(Statuses::INVERSION_PRIORITIZED);
                        inner.tasks[owner.index()].priority_restore_inversion =
                            inner.tasks[owner.index()].priority;
                        if inner.tasks[owner.index()].is_ready() {
                            readyqueue::delete(&mut inner.tasks, &mut inner.ready, owner);
                            inner.tasks[owner.index()].priority = inner.tasks[me.index()].priority;
                            readyqueue::add(&mut inner.tasks, &mut inner.ready, owner, self.nominal_priority);
                        } else {
                            inner.tasks[owner.index()].priority = inner.tasks[me.index()].priority;
                        }
                    }
                }
            }
            Ok(Some(me))
        });
        result.map_err(|_| SemaGetOutcome::Timeout)
    }

    #[cfg(feature = "semaphore")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sema_getW(&self, sema: SemaId, abort_pri: Priority) -> Result<SemaGetOutcome, BadParamError> {
        if sema.index() >= NUM_SEMA {
            return Err(BadParamError::BadSemaId);
        }
        Ok(match self.sema_get_prepare(sema, abort_pri) {
            Err(_) => SemaGetOutcome::Timeout,
            Ok(None) => SemaGetOutcome::OkNoBlock,
            Ok(Some(me)) => {
                self.finish(true);
                with_cpu_lock::<P, _>(|cs| {
                    let t = &self.inner.get_mut(cs).tasks[me.index()];
                    if t.notifications.contains(Notifications::UNBLOCKED_BY_MSG_SEND) {
                        SemaGetOutcome::AbortedByMessage
                    } else {
                        SemaGetOutcome::Ok
                    }
                })
            }
        })
    }

    #[cfg(feature = "semaphore")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sema_getT(
        &self,
        sema: SemaId,
        abort_pri: Priority,
        timeout: u32,
    ) -> Result<SemaGetOutcome, BadParamError> {
        if sema.index() >= NUM_SEMA {
            return Err(BadParamError::BadSemaId);
        }
        if timeout == 0 {
            let immediate = with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).semas[sema.index()].count > 0);
            if !immediate {
                return Ok(SemaGetOutcome::Timeout);
            }
        }
        Ok(match self.sema_get_prepare(sema, abort_pri) {
            Err(_) => SemaGetOutcome::Timeout,
            Ok(None) => SemaGetOutcome::OkNoBlock,
            Ok(Some(me)) => {
                with_cpu_lock::<P, _>(|cs| {
                    let inner = self.inner.get_mut(cs);
                    timerlist::add(&mut inner.tasks, &mut inner.timers, me, timeout);
                });
                self.finish(true);
                with_cpu_lock::<P, _>(|cs| {
                    let inner = self.inner.get_mut(cs);
                    timerlist::purge(&mut inner.tasks, &mut inner.timers, me);
                    let t = &inner.tasks[me.index()];
                    if t.notifications.contains(Notifications::TIMEOUT) {
                        SemaGetOutcome::Timeout
                    } else if t.notifications.contains(Notifications::UNBLOCKED_BY_MSG_SEND) {
                        SemaGetOutcome::AbortedByMessage
                    } else {
                        SemaGetOutcome::Ok
                    }
                })
            }
        })
    }

    /// Release `sema`. Returns `true` if releasing it changed the ready
    /// list's head.
    #[cfg(feature = "semaphore")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn sema_release(&self, sema: SemaId) -> bool {
        let switch_needed = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let mut switch_needed = false;
            if let Some(me) = inner.running {
                if inner.tasks[me.index()]
                    .statuses
                    .contains(Statuses::INVERSION_PRIORITIZED)
                {
                    switch_needed |= self.release_inversion(inner, me);
                }
            }
            match semaphore::pop_head(&mut inner.tasks, &mut inner.semas[sema.index()]) {
                None => {
                    inner.semas[sema.index()].count += 1;
                    inner.semas[sema.index()].owner = None;
                }
                Some(next) => {
                    inner.semas[sema.index()].owner = Some(next);
                    inner.tasks[next.index()].sema_block = Some(sema);
                    inner.tasks[next.index()].block_flags = BlockFlags::empty();
                    switch_needed |= readyqueue::add(
                        &mut inner.tasks,
                        &mut inner.ready,
                        next,
                        self.nominal_priority,
                    );
                }
            }
            switch_needed
        });
        self.finish(switch_needed);
        switch_needed
    }

    // ---------------------------------------------------------------
    // Messaging (C4)
    // ---------------------------------------------------------------

    fn awakeable(t: &TaskCb<NUM_MSG_PRI>, msg_priority: u8) -> bool {
        if t.block_flags.contains(BlockFlags::MSG) {
            return true;
        }
        if !cfg!(feature = "task_kill") {
            return false;
        }
        let abortable = t
            .block_flags
            .intersects(BlockFlags::ASLEEP | BlockFlags::BOP | BlockFlags::SEMA);
        abortable && msg_priority < t.abort_message_priority.0
    }

    fn msg_send_common(
        &self,
        block: BlockId,
        fields: MsgFields,
        parameter: u32,
        dest: TaskId,
    ) -> Result<MsgSendOutcome, MsgSendError> {
        let result = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            if dest.index() >= NUM_TASKS {
                message::pool_free(&mut inner.blocks, &mut inner.pool, block);
                return Err(MsgSendError::BadParam(BadParamError::BadTaskId));
            }
            if fields.priority() as usize >= NUM_MSG_PRI {
                message::pool_free(&mut inner.blocks, &mut inner.pool, block);
                return Err(MsgSendError::BadParam(BadParamError::BadPriority));
            }
            if inner.tasks[dest.index()]
                .block_flags
                .contains(BlockFlags::NOT_LAUNCHED)
            {
                message::pool_free(&mut inner.blocks, &mut inner.pool, block);
                return Err(MsgSendError::DestinationNotLaunched);
            }
            inner.blocks[block.index()].fields = fields;
            inner.blocks[block.index()].parameter = parameter;
            let pri_idx = fields.priority() as usize;
            message::enqueue(&mut inner.tasks, &mut inner.blocks, dest.index(), pri_idx, block);

            let was_waiting_msg = inner.tasks[dest.index()].block_flags.contains(BlockFlags::MSG);
            if !Self::awakeable(&inner.tasks[dest.index()], fields.priority()) {
                return Ok((MsgSendOutcome::Ok, false));
            }

            if !was_waiting_msg {
                inner.tasks[dest.index()].notifications = Notifications::UNBLOCKED_BY_MSG_SEND;
                if inner.tasks[dest.index()].block_flags.contains(BlockFlags::SEMA) {
                    if let Some(sema_id) = inner.tasks[dest.index()].sema_block {
                        semaphore::remove_waiter(&mut inner.tasks, &mut inner.semas[sema_id.index()], dest);
                    }
                }
            }

            let outcome = if was_waiting_msg {
                MsgSendOutcome::AwokeReceiver
            } else {
                MsgSendOutcome::AbortedReceiver
            };

            if inner.tasks[dest.index()].statuses.contains(Statuses::BOP_LOCKED) {
                inner.tasks[dest.index()].block_flags.remove(BlockFlags::BOP);
                return Ok((outcome, false));
            }

            inner.tasks[dest.index()].block_flags = BlockFlags::empty();
            let sw = readyqueue::add(&mut inner.tasks, &mut inner.ready, dest, self.nominal_priority);
            Ok((outcome, sw))
        });
        match result {
            Ok((outcome, switch_needed)) => {
                self.finish(switch_needed);
                Ok(outcome)
            }
            Err(e) => {
                self.finish(false);
                Err(e)
            }
        }
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_send(
        &self,
        fields: MsgFields,
        parameter: u32,
        dest: TaskId,
    ) -> Result<MsgSendOutcome, MsgSendError> {
        let block = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let b = message::pool_alloc(&mut inner.blocks, &mut inner.pool);
            if b.is_none() {
                inner.pool.depletion_count += 1;
            }
            b
        });
        let Some(block) = block else {
            return Err(MsgSendError::PoolExhausted);
        };
        self.msg_send_common(block, fields, parameter, dest)
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_get_block(&self) -> Option<BlockId> {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let b = message::pool_alloc(&mut inner.blocks, &mut inner.pool);
            if b.is_none() {
                inner.pool.depletion_count += 1;
            }
            b
        })
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_block_set(&self, block: BlockId, fields: MsgFields, parameter: u32) {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.blocks[block.index()].fields = fields;
            inner.blocks[block.index()].parameter = parameter;
        });
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_send_by_block(
        &self,
        block: BlockId,
        dest: TaskId,
    ) -> Result<MsgSendOutcome, MsgSendError> {
        if block.index() >= NUM_MSG_BLOCKS {
            return Err(MsgSendError::BadParam(BadParamError::BadBlockId));
        }
        let (fields, parameter) = with_cpu_lock::<P, _>(|cs| {
            let b = &self.inner.get_mut(cs).blocks[block.index()];
            (b.fields, b.parameter)
        });
        self.msg_send_common(block, fields, parameter, dest)
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_free_block(&self, block: BlockId) {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            message::pool_free(&mut inner.blocks, &mut inner.pool, block);
        });
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_free_count(&self) -> usize {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            message::free_count(&inner.blocks, &inner.pool)
        })
    }

    #[cfg(feature = "messaging")]
    fn msg_try_receive(&self, me: TaskId) -> Option<(MsgFields, u32)> {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let block = message::dequeue_highest(&mut inner.tasks, &mut inner.blocks, me.index())?;
            let payload = (inner.blocks[block.index()].fields, inner.blocks[block.index()].parameter);
            message::pool_free(&mut inner.blocks, &mut inner.pool, block);
            Some(payload)
        })
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_getW(&self) -> (MsgFields, u32) {
        loop {
            let Some(me) = self.self_tid() else {
                P::contract_failure(file!(), line!());
            };
            if let Some(payload) = self.msg_try_receive(me) {
                return payload;
            }
            with_cpu_lock::<P, _>(|cs| {
                let inner = self.inner.get_mut(cs);
                inner.tasks[me.index()].notifications = Notifications::empty();
                readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
                inner.tasks[me.index()].block_flags = BlockFlags::MSG;
            });
            self.finish(true);
        }
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_getT(&self, timeout: u32) -> MsgGetOutcome {
        let Some(me) = self.self_tid() else {
            return MsgGetOutcome::Timeout;
        };
        if let Some((f, p)) = self.msg_try_receive(me) {
            return MsgGetOutcome::Received(f, p);
        }
        if timeout == 0 {
            return MsgGetOutcome::Timeout;
        }
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.tasks[me.index()].notifications = Notifications::empty();
            timerlist::add(&mut inner.tasks, &mut inner.timers, me, timeout);
            readyqueue::delete(&mut inner.tasks, &mut inner.ready, me);
            inner.tasks[me.index()].block_flags = BlockFlags::MSG;
        });
        self.finish(true);
        let timed_out = with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            timerlist::purge(&mut inner.tasks, &mut inner.timers, me);
            inner.tasks[me.index()].notifications.contains(Notifications::TIMEOUT)
        });
        if timed_out {
            return MsgGetOutcome::Timeout;
        }
        match self.msg_try_receive(me) {
            Some((f, p)) => MsgGetOutcome::Received(f, p),
            None => MsgGetOutcome::AbortedByMessage,
        }
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_peek(&self) -> Option<(MsgFields, u32)> {
        let me = self.self_tid()?;
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let block = message::peek_highest(&inner.tasks, me.index())?;
            Some((inner.blocks[block.index()].fields, inner.blocks[block.index()].parameter))
        })
    }

    #[cfg(feature = "messaging")]
    fn msg_drain_locked(
        &self,
        inner: &mut Inner<NUM_TASKS, NUM_SEMA, NUM_MSG_PRI, NUM_MSG_BLOCKS>,
        who: TaskId,
        from_pri_idx: usize,
    ) -> u32 {
        let mut count = 0;
        if let Some((head, _tail)) = message::drain(&mut inner.tasks, &mut inner.blocks, who.index(), from_pri_idx) {
            let mut cur = Some(head);
            while let Some(b) = cur {
                cur = inner.blocks[b.index()].flink;
                count += 1;
            }
            message::free_chain(&mut inner.blocks, &mut inner.pool, Some(head));
        }
        count
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_drain(&self, from_priority: u8) -> u32 {
        let Some(me) = self.self_tid() else { return 0 };
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            self.msg_drain_locked(inner, me, from_priority as usize)
        })
    }

    #[cfg(feature = "messaging")]
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn msg_purge(&self, fields: MsgFields, do_all: bool) -> u32 {
        let Some(me) = self.self_tid() else { return 0 };
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            let purged = message::purge(
                &mut inner.tasks,
                &mut inner.blocks,
                &mut inner.pool,
                me.index(),
                fields.priority() as usize,
                fields.prefix(),
                fields.id(),
                !do_all,
            );
            inner.msg_purge_count += purged;
            purged
        })
    }

    // ---------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------

    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn tick_count_get(&self) -> u32 {
        with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).tick_count)
    }

    /// Elapsed ticks since `since`, correctly handling the 32-bit wraparound.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn tick_count_delta(&self, since: u32) -> u32 {
        self.tick_count_get().wrapping_sub(since)
    }

    // ---------------------------------------------------------------
    // Tick handler (C8)
    // ---------------------------------------------------------------

    /// Drive the timer list forward by one tick. Called from the platform's
    /// periodic timer interrupt.
    #[cfg_attr(not(feature = "inline_syscall"), inline(never))]
    pub fn tick(&self) {
        with_cpu_lock::<P, _>(|cs| {
            let inner = self.inner.get_mut(cs);
            inner.tick_count = inner.tick_count.wrapping_add(1);
        });

        let mut cur = with_cpu_lock::<P, _>(|cs| self.inner.get_mut(cs).timers.head);
        let mut any_switch = false;

        while let Some(id) = cur {
            let (next, expired) = with_cpu_lock::<P, _>(|cs| {
                let inner = self.inner.get_mut(cs);
                let next = inner.tasks[id.index()].flink_timer;
                if !inner.tasks[id.index()].statuses.contains(Statuses::TIMER_RUNNING) {
                    return (next, false);
                }
                inner.tasks[id.index()].timer = inner.tasks[id.index()].timer.saturating_sub(1);
                if inner.tasks[id.index()].timer != 0 {
                    return (next, false);
                }
                if inner.tasks[id.index()].statuses.contains(Statuses::BOP_LOCKED)
                    && inner.tasks[id.index()].block_flags.contains(BlockFlags::BOP)
                {
                    inner.tasks[id.index()].timer = 1;
                    return (next, false);
                }
                timerlist::purge(&mut inner.tasks, &mut inner.timers, id);
                (next, true)
            });

            if expired {
                let switch_needed = with_cpu_lock::<P, _>(|cs| {
                    let inner = self.inner.get_mut(cs);
                    if inner.tasks[id.index()].is_ready() {
                        return false;
                    }
                    if inner.tasks[id.index()].block_flags.contains(BlockFlags::SEMA) {
                        if let Some(sema_id) = inner.tasks[id.index()].sema_block {
                            semaphore::remove_waiter(&mut inner.tasks, &mut inner.semas[sema_id.index()], id);
                        }
                    }
                    inner.tasks[id.index()].block_flags = BlockFlags::empty();
                    inner.tasks[id.index()].notifications.insert(Notifications::TIMEOUT);
                    readyqueue::add(&mut inner.tasks, &mut inner.ready, id, self.nominal_priority)
                });
                any_switch |= switch_needed;
            }
            cur = next;
        }

        if any_switch {
            P::invoke_context_switch();
        }
        P::secondary_context_switch();
    }
}

fn exit_trampoline_stub() -> ! {
    unreachable!("platform must supply its own exit trampoline wired to Kernel::exit_current")
}
