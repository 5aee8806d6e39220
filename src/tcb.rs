//! Task control block and the per-task state it carries.
use crate::ids::{Priority, SemaId, TaskId};

bitflags::bitflags! {
    /// Exactly one of these bits is set while a task is blocked; all clear
    /// means the task is ready or running.
    pub struct BlockFlags: u8 {
        const NOT_LAUNCHED  = 0x01;
        const ASLEEP        = 0x02;
        const BOP           = 0x04;
        const MSG           = 0x08;
        const SEMA          = 0x10;
    }
}

bitflags::bitflags! {
    /// Independent status bits, orthogonal to [`BlockFlags`].
    pub struct Statuses: u8 {
        const TIMER_RUNNING        = 0x01;
        /// Reserved for a pre-arrival bop queue; never set by this
        /// implementation (see the open question in the design notes).
        const BOP_PRE_ARRIVED      = 0x02;
        const BOP_LOCKED           = 0x04;
        const INVERSION_PRIORITIZED = 0x08;
    }
}

bitflags::bitflags! {
    /// Reason(s) a wait ended. Cleared by the waiter before blocking, set by
    /// whichever side ends the wait; a concurrent timeout and abort message
    /// both being latched is legal and the waiter checks both.
    pub struct Notifications: u8 {
        const TIMEOUT               = 0x01;
        const UNBLOCKED_BY_MSG_SEND = 0x02;
    }
}

/// Static, build-time description of a task, supplied by the integrator.
#[derive(Debug, Clone, Copy)]
pub struct TaskAttr {
    pub name: &'static str,
    pub entry: fn(usize),
    /// Passed to `entry` on launch; lets several tasks share one entry
    /// function while behaving differently (e.g. selecting which of several
    /// identical worker loops this task instance runs).
    pub instance: usize,
    pub stack_base: *mut u8,
    pub stack_size: usize,
    pub start_priority: Priority,
}

// Safety: `stack_base` is only ever touched by `Port::prepare_stack`, under
// the same single-threaded, critical-section discipline as everything else.
unsafe impl Sync for TaskAttr {}

/// Mutable per-task state. One instance per task, living in the kernel's
/// static task table; all fields are plain `Copy` data so that the whole
/// table can be const-initialized and protected by one
/// [`CpuLockCell`](crate::klock::CpuLockCell).
#[derive(Debug, Clone, Copy)]
pub struct TaskCb<const NUM_MSG_PRI: usize> {
    pub(crate) flink: Option<TaskId>,
    pub(crate) flink_timer: Option<TaskId>,
    pub(crate) blink_timer: Option<TaskId>,
    pub(crate) blink: Option<TaskId>,
    pub(crate) stack_ptr: *mut u8,
    pub(crate) timer: u32,
    pub(crate) block_flags: BlockFlags,
    pub(crate) statuses: Statuses,
    pub(crate) notifications: Notifications,
    pub(crate) priority: Priority,
    pub(crate) priority_restore_prioritized: Priority,
    pub(crate) priority_restore_inversion: Priority,
    pub(crate) abort_message_priority: Priority,
    pub(crate) bop_key: u16,
    pub(crate) sema_block: Option<SemaId>,
    pub(crate) inbox_head: [Option<u16>; NUM_MSG_PRI],
    pub(crate) inbox_tail: [Option<u16>; NUM_MSG_PRI],
}

impl<const NUM_MSG_PRI: usize> TaskCb<NUM_MSG_PRI> {
    pub const INIT: Self = Self {
        flink: None,
        flink_timer: None,
        blink_timer: None,
        blink: None,
        stack_ptr: core::ptr::null_mut(),
        timer: 0,
        block_flags: BlockFlags::NOT_LAUNCHED,
        statuses: Statuses::empty(),
        notifications: Notifications::empty(),
        priority: Priority::NONE,
        priority_restore_prioritized: Priority::NONE,
        priority_restore_inversion: Priority::NONE,
        abort_message_priority: Priority::NONE,
        bop_key: 0,
        sema_block: None,
        inbox_head: [None; NUM_MSG_PRI],
        inbox_tail: [None; NUM_MSG_PRI],
    };

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.block_flags.is_empty()
    }
}
