//! Counting semaphore with priority inheritance (spec component C6).
//!
//! The waiter list is doubly linked and kept sorted by ascending priority
//! (FIFO within a priority) so that the common operations — inserting a new
//! waiter, and removing an arbitrary one when a timeout or an abort message
//! fires — are each a single splice once the insertion point or the node
//! itself is known, without needing a second, reverse walk.
use crate::ids::TaskId;
use crate::tcb::TaskCb;

bitflags::bitflags! {
    pub struct SemaFlags: u8 {
        const PREVENT_PRI_INV = 0x01;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SemaCb {
    pub count: u32,
    pub flags: SemaFlags,
    pub owner: Option<TaskId>,
    pub wait_head: Option<TaskId>,
    pub wait_tail: Option<TaskId>,
}

impl SemaCb {
    pub const fn new(initial_count: u32, flags: SemaFlags) -> Self {
        Self {
            count: initial_count,
            flags,
            owner: None,
            wait_head: None,
            wait_tail: None,
        }
    }

    pub const INIT: Self = Self::new(0, SemaFlags::empty());
}

fn priority_of<const N: usize>(tasks: &[TaskCb<N>], id: TaskId) -> crate::ids::Priority {
    tasks[id.index()].priority
}

/// Insert `id` into the waiter list in ascending-priority, FIFO-within-tie
/// order.
pub fn insert_waiter<const N: usize>(tasks: &mut [TaskCb<N>], sema: &mut SemaCb, id: TaskId) {
    let pri = priority_of(tasks, id);

    let Some(mut cur) = sema.wait_head else {
        tasks[id.index()].flink = None;
        tasks[id.index()].blink = None;
        sema.wait_head = Some(id);
        sema.wait_tail = Some(id);
        return;
    };

    // Find the first waiter with strictly greater priority; insert before it.
    loop {
        if priority_of(tasks, cur) > pri {
            let prev = tasks[cur.index()].blink;
            tasks[id.index()].flink = Some(cur);
            tasks[id.index()].blink = prev;
            tasks[cur.index()].blink = Some(id);
            match prev {
                Some(p) => tasks[p.index()].flink = Some(id),
                None => sema.wait_head = Some(id),
            }
            return;
        }
        match tasks[cur.index()].flink {
            Some(next) => cur = next,
            None => {
                tasks[cur.index()].flink = Some(id);
                tasks[id.index()].blink = Some(cur);
                tasks[id.index()].flink = None;
                sema.wait_tail = Some(id);
                return;
            }
        }
    }
}

/// Remove an arbitrary waiter (timeout, abort-by-message, or kill). O(1)
/// since the list is doubly linked.
pub fn remove_waiter<const N: usize>(tasks: &mut [TaskCb<N>], sema: &mut SemaCb, id: TaskId) {
    let prev = tasks[id.index()].blink;
    let next = tasks[id.index()].flink;
    match prev {
        Some(p) => tasks[p.index()].flink = next,
        None => sema.wait_head = next,
    }
    match next {
        Some(n) => tasks[n.index()].blink = prev,
        None => sema.wait_tail = prev,
    }
    tasks[id.index()].flink = None;
    tasks[id.index()].blink = None;
}

/// Pop the highest-priority (head) waiter, if any.
pub fn pop_head<const N: usize>(tasks: &mut [TaskCb<N>], sema: &mut SemaCb) -> Option<TaskId> {
    let head = sema.wait_head?;
    remove_waiter(tasks, sema, head);
    Some(head)
}
