//! The tick-driven timer list (spec component C3).
//!
//! Doubly linked, unsorted — every entry is decremented once per tick, so
//! there is no benefit to keeping it sorted by deadline the way a delta
//! queue would. Membership is tracked by the task's own
//! [`Statuses::TIMER_RUNNING`](crate::tcb::Statuses::TIMER_RUNNING) bit, and
//! the two are required to always agree.
use crate::ids::TaskId;
use crate::tcb::{Statuses, TaskCb};

#[derive(Debug, Clone, Copy, Default)]
pub struct TimerList {
    pub head: Option<TaskId>,
    pub tail: Option<TaskId>,
}

impl TimerList {
    pub const INIT: Self = Self {
        head: None,
        tail: None,
    };
}

/// Add `id` to the timer list with `ticks` remaining.
///
/// The caller must ensure `id` is not already on the timer list.
pub fn add<const N: usize>(tasks: &mut [TaskCb<N>], list: &mut TimerList, id: TaskId, ticks: u32) {
    debug_assert!(!tasks[id.index()].statuses.contains(Statuses::TIMER_RUNNING));
    tasks[id.index()].timer = ticks;
    tasks[id.index()].flink_timer = None;
    tasks[id.index()].blink_timer = list.tail;
    match list.tail {
        Some(old_tail) => tasks[old_tail.index()].flink_timer = Some(id),
        None => list.head = Some(id),
    }
    list.tail = Some(id);
    tasks[id.index()].statuses.insert(Statuses::TIMER_RUNNING);
}

/// Remove `id` from the timer list if it is on it. Returns whether it was.
pub fn purge<const N: usize>(tasks: &mut [TaskCb<N>], list: &mut TimerList, id: TaskId) -> bool {
    if !tasks[id.index()].statuses.contains(Statuses::TIMER_RUNNING) {
        return false;
    }
    let prev = tasks[id.index()].blink_timer;
    let next = tasks[id.index()].flink_timer;
    match prev {
        Some(p) => tasks[p.index()].flink_timer = next,
        None => list.head = next,
    }
    match next {
        Some(n) => tasks[n.index()].blink_timer = prev,
        None => list.tail = prev,
    }
    tasks[id.index()].flink_timer = None;
    tasks[id.index()].blink_timer = None;
    tasks[id.index()].statuses.remove(Statuses::TIMER_RUNNING);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(n: usize) -> Vec<TaskCb<1>> {
        vec![TaskCb::INIT; n]
    }

    #[test]
    fn add_and_purge_roundtrip() {
        let mut tasks = fresh(3);
        let mut list = TimerList::INIT;
        add(&mut tasks, &mut list, TaskId::from_index(0), 5);
        add(&mut tasks, &mut list, TaskId::from_index(1), 2);
        add(&mut tasks, &mut list, TaskId::from_index(2), 9);
        assert!(purge(&mut tasks, &mut list, TaskId::from_index(1)));
        assert!(!tasks[1].statuses.contains(Statuses::TIMER_RUNNING));
        assert_eq!(list.head, Some(TaskId::from_index(0)));
        assert_eq!(tasks[0].flink_timer, Some(TaskId::from_index(2)));
        assert_eq!(tasks[2].blink_timer, Some(TaskId::from_index(0)));
        assert!(!purge(&mut tasks, &mut list, TaskId::from_index(1)));
    }

    #[test]
    fn purge_only_member_empties_list() {
        let mut tasks = fresh(1);
        let mut list = TimerList::INIT;
        add(&mut tasks, &mut list, TaskId::from_index(0), 1);
        assert!(purge(&mut tasks, &mut list, TaskId::from_index(0)));
        assert!(list.head.is_none());
        assert!(list.tail.is_none());
    }
}
