//! The priority-ordered ready list (spec component C2).
//!
//! Singly linked through each [`TaskCb::flink`](crate::tcb::TaskCb), sorted
//! by ascending priority value (lowest number first), FIFO within a
//! priority. `tail_nominal` caches the last task running at the configured
//! nominal priority so that the overwhelmingly common case — another
//! nominal-priority task becoming ready — is an O(1) splice instead of a
//! list walk.
use crate::ids::{Priority, TaskId};
use crate::tcb::TaskCb;

/// The three roots of the ready list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyList {
    pub head: Option<TaskId>,
    pub tail: Option<TaskId>,
    pub tail_nominal: Option<TaskId>,
}

impl ReadyList {
    pub const INIT: Self = Self {
        head: None,
        tail: None,
        tail_nominal: None,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

fn priority_of<const N: usize>(tasks: &[TaskCb<N>], id: TaskId) -> Priority {
    tasks[id.index()].priority
}

/// Insert `id` into the ready list. Returns `true` if the head of the list
/// changed (i.e. a context switch should be considered).
pub fn add<const N: usize>(
    tasks: &mut [TaskCb<N>],
    list: &mut ReadyList,
    id: TaskId,
    nominal: Priority,
) -> bool {
    let pri = priority_of(tasks, id);

    // Path 1: empty list.
    let Some(head) = list.head else {
        tasks[id.index()].flink = None;
        list.head = Some(id);
        list.tail = Some(id);
        if pri == nominal {
            list.tail_nominal = Some(id);
        }
        return true;
    };

    // Path 2: nominal-priority fast append after the cached nominal tail.
    if pri == nominal {
        if let Some(nom) = list.tail_nominal {
            tasks[id.index()].flink = tasks[nom.index()].flink;
            tasks[nom.index()].flink = Some(id);
            if list.tail == Some(nom) {
                list.tail = Some(id);
            }
            list.tail_nominal = Some(id);
            return false;
        }
    }

    // Path 3: new head.
    if pri < priority_of(tasks, head) {
        tasks[id.index()].flink = Some(head);
        list.head = Some(id);
        return true;
    }

    let tail = list.tail.expect("non-empty ready list must have a tail");

    // Path 4: append at tail.
    if pri >= priority_of(tasks, tail) {
        tasks[tail.index()].flink = Some(id);
        tasks[id.index()].flink = None;
        list.tail = Some(id);
        if pri == nominal {
            list.tail_nominal = Some(id);
        }
        return false;
    }

    // Path 5: general walk. Start from `tail_nominal` when it exists and the
    // new priority is no higher than nominal; otherwise start from `head`.
    let start = if pri < nominal { None } else { list.tail_nominal };
    let mut prev = start.unwrap_or(head);
    loop {
        let next = tasks[prev.index()].flink;
        match next {
            Some(n) if priority_of(tasks, n) <= pri => {
                prev = n;
            }
            _ => break,
        }
    }
    tasks[id.index()].flink = tasks[prev.index()].flink;
    tasks[prev.index()].flink = Some(id);
    if list.tail == Some(prev) {
        list.tail = Some(id);
    }
    if pri == nominal && list.tail_nominal.is_none() {
        list.tail_nominal = Some(id);
    }
    false
}

/// Pop and return the head of the ready list.
pub fn remove_head<const N: usize>(
    tasks: &mut [TaskCb<N>],
    list: &mut ReadyList,
) -> Option<TaskId> {
    let old_head = list.head?;
    let next = tasks[old_head.index()].flink;
    tasks[old_head.index()].flink = None;
    list.head = next;
    match next {
        None => {
            list.tail = None;
            list.tail_nominal = None;
        }
        Some(_) if list.tail_nominal == Some(old_head) => {
            list.tail_nominal = None;
        }
        Some(_) => {}
    }
    Some(old_head)
}

/// Remove an arbitrary task from the ready list (used when re-sorting a
/// task whose priority changed while it was already ready). Returns `true`
/// if the task was found and removed.
pub fn delete<const N: usize>(
    tasks: &mut [TaskCb<N>],
    list: &mut ReadyList,
    id: TaskId,
) -> bool {
    let Some(head) = list.head else { return false };

    if head == id {
        remove_head(tasks, list);
        return true;
    }

    let mut prev = head;
    let mut last_nominal_before: Option<TaskId> = None;
    loop {
        let Some(cur) = tasks[prev.index()].flink else {
            return false;
        };
        if cur == id {
            let after = tasks[cur.index()].flink;
            tasks[prev.index()].flink = after;
            tasks[cur.index()].flink = None;
            if list.tail == Some(cur) {
                list.tail = Some(prev);
            }
            if list.tail_nominal == Some(cur) {
                list.tail_nominal = last_nominal_before;
            }
            return true;
        }
        prev = cur;
        last_nominal_before = Some(prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMINAL: Priority = Priority(100);

    fn fresh(n: usize) -> Vec<TaskCb<1>> {
        let mut v = vec![TaskCb::INIT; n];
        for (i, t) in v.iter_mut().enumerate() {
            t.priority = Priority(100);
            let _ = i;
        }
        v
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut tasks = fresh(4);
        let mut list = ReadyList::INIT;
        for i in 0..4 {
            add(&mut tasks, &mut list, TaskId::from_index(i), NOMINAL);
        }
        let mut order = vec![];
        while let Some(id) = remove_head(&mut tasks, &mut list) {
            order.push(id.index());
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn higher_priority_preempts_head() {
        let mut tasks = fresh(3);
        tasks[0].priority = Priority(100);
        tasks[1].priority = Priority(100);
        tasks[2].priority = Priority(5);
        let mut list = ReadyList::INIT;
        add(&mut tasks, &mut list, TaskId::from_index(0), NOMINAL);
        add(&mut tasks, &mut list, TaskId::from_index(1), NOMINAL);
        let switch = add(&mut tasks, &mut list, TaskId::from_index(2), NOMINAL);
        assert!(switch);
        assert_eq!(list.head, Some(TaskId::from_index(2)));
    }

    #[test]
    fn ascending_priority_order_with_mixed_priorities() {
        let mut tasks = fresh(5);
        let pris = [50u8, 10, 100, 10, 5];
        for (i, p) in pris.iter().enumerate() {
            tasks[i].priority = Priority(*p);
        }
        let mut list = ReadyList::INIT;
        for i in 0..5 {
            add(&mut tasks, &mut list, TaskId::from_index(i), NOMINAL);
        }
        let mut order = vec![];
        while let Some(id) = remove_head(&mut tasks, &mut list) {
            order.push(pris[id.index()]);
        }
        assert_eq!(order, vec![5, 10, 10, 50, 100]);
    }

    #[test]
    fn delete_from_middle_keeps_invariants() {
        let mut tasks = fresh(4);
        let mut list = ReadyList::INIT;
        for i in 0..4 {
            add(&mut tasks, &mut list, TaskId::from_index(i), NOMINAL);
        }
        assert!(delete(&mut tasks, &mut list, TaskId::from_index(2)));
        let mut order = vec![];
        while let Some(id) = remove_head(&mut tasks, &mut list) {
            order.push(id.index());
        }
        assert_eq!(order, vec![0, 1, 3]);
    }

    #[test]
    fn empty_iff_tail_empty() {
        let mut tasks = fresh(1);
        let mut list = ReadyList::INIT;
        assert!(list.is_empty());
        add(&mut tasks, &mut list, TaskId::from_index(0), NOMINAL);
        assert!(!list.is_empty());
        remove_head(&mut tasks, &mut list);
        assert!(list.is_empty());
        assert!(list.tail.is_none());
    }

    // Property-based: the list's three roots and the chain they anchor stay
    // internally consistent no matter what sequence of inserts and deletes
    // it's put through.
    #[derive(Clone, Copy, Debug)]
    enum Cmd {
        Add(u8),
        DeleteHead,
        DeleteArbitrary(u8),
    }

    fn interpret(bytecode: &[u8], max_len: usize) -> impl Iterator<Item = Cmd> + '_ {
        bytecode.chunks(2).take(max_len).map(|chunk| {
            let opcode = chunk[0];
            let operand = chunk.get(1).copied().unwrap_or(0);
            match opcode % 3 {
                0 => Cmd::Add(operand),
                1 => Cmd::DeleteHead,
                _ => Cmd::DeleteArbitrary(operand),
            }
        })
    }

    fn check_invariants(tasks: &[TaskCb<1>], list: &ReadyList) {
        assert_eq!(list.head.is_none(), list.tail.is_none());
        if list.tail_nominal.is_some() {
            assert!(list.head.is_some());
        }
        let mut seen = vec![];
        let mut prev_pri: Option<Priority> = None;
        let mut cur = list.head;
        while let Some(id) = cur {
            assert!(!seen.contains(&id), "ready list cycle at {:?}", id);
            seen.push(id);
            let pri = tasks[id.index()].priority;
            if let Some(p) = prev_pri {
                assert!(p <= pri, "ready list not ascending: {:?} then {:?}", p, pri);
            }
            prev_pri = Some(pri);
            cur = tasks[id.index()].flink;
        }
        assert_eq!(seen.last().copied(), list.tail);
        if let Some(tail) = list.tail {
            assert!(tasks[tail.index()].flink.is_none());
        }
    }

    const POOL: usize = 8;

    fn test_inner(bytecode: Vec<u8>) {
        let mut tasks = fresh(POOL);
        // Spread priorities across a handful of distinct values, including
        // the nominal one, so insertion exercises every path in `add`.
        for (i, t) in tasks.iter_mut().enumerate() {
            t.priority = Priority([5, 10, 50, 100, 100, 150, 200, 250][i % 8]);
        }
        let mut list = ReadyList::INIT;
        let mut present = [false; POOL];

        log::debug!("bytecode len = {}", bytecode.len());

        for cmd in interpret(&bytecode, 200) {
            log::trace!("    {:?}", cmd);
            match cmd {
                Cmd::Add(b) => {
                    let id = TaskId::from_index((b as usize) % POOL);
                    if !present[id.index()] {
                        add(&mut tasks, &mut list, id, NOMINAL);
                        present[id.index()] = true;
                    }
                }
                Cmd::DeleteHead => {
                    if let Some(id) = remove_head(&mut tasks, &mut list) {
                        present[id.index()] = false;
                    }
                }
                Cmd::DeleteArbitrary(b) => {
                    let id = TaskId::from_index((b as usize) % POOL);
                    if present[id.index()] && delete(&mut tasks, &mut list, id) {
                        present[id.index()] = false;
                    }
                }
            }
            check_invariants(&tasks, &list);
        }
    }

    #[quickcheck_macros::quickcheck]
    fn invariants_hold_after_every_operation(bytecode: Vec<u8>) {
        test_inner(bytecode);
    }

    #[test]
    fn invariants_hold_on_regression_sequence() {
        let _ = env_logger::builder().is_test(true).try_init();

        // A fixed sequence that happened to exercise the tail_nominal splice,
        // a delete of the cached tail_nominal itself, and a delete of the
        // list's last remaining element, all in one run.
        test_inner(vec![
            0, 3, 0, 4, 1, 3, 0, 0, 2, 4, 0, 7, 1, 0, 2, 3, 0, 1, 1, 0,
        ]);
    }
}
