//! Message block pool and per-task priority inboxes (spec component C4).
//!
//! A single static pool of blocks is shared by every task. Sending a
//! message allocates a block from the pool's free list and appends it to
//! one of the destination's per-priority inbox queues; receiving dequeues
//! from the lowest-numbered (most urgent) non-empty queue first, and FIFO
//! within a queue.
use crate::ids::BlockId;
use crate::tcb::TaskCb;

/// The packed fields word attached to every message: prefix and id are
/// opaque to the kernel and carried verbatim between sender and receiver;
/// sending-task and priority are interpreted by the kernel itself.
///
/// Bit layout, preserved from the wire format this kernel's messaging
/// contract was distilled from: bits 31-22 prefix, 21-12 id, 11-4
/// sending task, 3-2 unused, 1-0 priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgFields(pub u32);

impl MsgFields {
    const PREFIX_SHIFT: u32 = 22;
    const ID_SHIFT: u32 = 12;
    const SENDING_TASK_SHIFT: u32 = 4;
    const PRIORITY_SHIFT: u32 = 0;
    const PREFIX_MASK: u32 = 0x3FF;
    const ID_MASK: u32 = 0x3FF;
    const SENDING_TASK_MASK: u32 = 0xFF;
    const PRIORITY_MASK: u32 = 0x3;

    pub fn new(prefix: u16, id: u16, sending_task: u8, priority: u8) -> Self {
        Self(0)
            .with_prefix(prefix)
            .with_id(id)
            .with_sending_task(sending_task)
            .with_priority(priority)
    }

    pub fn prefix(self) -> u16 {
        ((self.0 >> Self::PREFIX_SHIFT) & Self::PREFIX_MASK) as u16
    }
    pub fn with_prefix(self, prefix: u16) -> Self {
        let cleared = self.0 & !(Self::PREFIX_MASK << Self::PREFIX_SHIFT);
        Self(cleared | ((prefix as u32 & Self::PREFIX_MASK) << Self::PREFIX_SHIFT))
    }

    pub fn id(self) -> u16 {
        ((self.0 >> Self::ID_SHIFT) & Self::ID_MASK) as u16
    }
    pub fn with_id(self, id: u16) -> Self {
        let cleared = self.0 & !(Self::ID_MASK << Self::ID_SHIFT);
        Self(cleared | ((id as u32 & Self::ID_MASK) << Self::ID_SHIFT))
    }

    pub fn sending_task(self) -> u8 {
        ((self.0 >> Self::SENDING_TASK_SHIFT) & Self::SENDING_TASK_MASK) as u8
    }
    pub fn with_sending_task(self, task: u8) -> Self {
        let cleared = self.0 & !(Self::SENDING_TASK_MASK << Self::SENDING_TASK_SHIFT);
        Self(cleared | ((task as u32 & Self::SENDING_TASK_MASK) << Self::SENDING_TASK_SHIFT))
    }

    pub fn priority(self) -> u8 {
        ((self.0 >> Self::PRIORITY_SHIFT) & Self::PRIORITY_MASK) as u8
    }
    pub fn with_priority(self, priority: u8) -> Self {
        let cleared = self.0 & !(Self::PRIORITY_MASK << Self::PRIORITY_SHIFT);
        Self(cleared | ((priority as u32 & Self::PRIORITY_MASK) << Self::PRIORITY_SHIFT))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MsgBlock {
    pub(crate) flink: Option<BlockId>,
    pub fields: MsgFields,
    pub parameter: u32,
}

impl MsgBlock {
    pub const INIT: Self = Self {
        flink: None,
        fields: MsgFields(0),
        parameter: 0,
    };
}

/// Free list roots for the shared message block pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolRoots {
    pub free_head: Option<BlockId>,
    pub free_tail: Option<BlockId>,
    pub depletion_count: u32,
}

impl PoolRoots {
    pub const INIT: Self = Self {
        free_head: None,
        free_tail: None,
        depletion_count: 0,
    };
}

/// Build the pool's initial free list out of every block in `blocks`.
pub fn pool_init(blocks: &mut [MsgBlock], roots: &mut PoolRoots) {
    roots.free_head = None;
    roots.free_tail = None;
    for i in (0..blocks.len()).rev() {
        blocks[i].flink = roots.free_head;
        roots.free_head = Some(BlockId::from_index(i));
        if roots.free_tail.is_none() {
            roots.free_tail = Some(BlockId::from_index(i));
        }
    }
}

pub fn pool_alloc(blocks: &mut [MsgBlock], roots: &mut PoolRoots) -> Option<BlockId> {
    let head = roots.free_head?;
    roots.free_head = blocks[head.index()].flink;
    if roots.free_head.is_none() {
        roots.free_tail = None;
    }
    blocks[head.index()].flink = None;
    Some(head)
}

pub fn pool_free(blocks: &mut [MsgBlock], roots: &mut PoolRoots, id: BlockId) {
    blocks[id.index()].flink = None;
    match roots.free_tail {
        Some(tail) => blocks[tail.index()].flink = Some(id),
        None => roots.free_head = Some(id),
    }
    roots.free_tail = Some(id);
}

pub fn free_count(blocks: &[MsgBlock], roots: &PoolRoots) -> usize {
    let mut count = 0;
    let mut cur = roots.free_head;
    while let Some(id) = cur {
        count += 1;
        cur = blocks[id.index()].flink;
    }
    count
}

/// Append `block` to the tail of task `task_idx`'s inbox at `pri_idx`.
pub fn enqueue<const N: usize>(
    tasks: &mut [TaskCb<N>],
    blocks: &mut [MsgBlock],
    task_idx: usize,
    pri_idx: usize,
    block: BlockId,
) {
    blocks[block.index()].flink = None;
    match tasks[task_idx].inbox_tail[pri_idx] {
        Some(tail) => blocks[tail as usize].flink = Some(block),
        None => tasks[task_idx].inbox_head[pri_idx] = Some(block.index() as u16),
    }
    tasks[task_idx].inbox_tail[pri_idx] = Some(block.index() as u16);
}

/// Dequeue the most urgent (lowest-index) non-empty inbox entry.
pub fn dequeue_highest<const N: usize>(
    tasks: &mut [TaskCb<N>],
    blocks: &mut [MsgBlock],
    task_idx: usize,
) -> Option<BlockId> {
    for pri_idx in 0..tasks[task_idx].inbox_head.len() {
        if let Some(head_raw) = tasks[task_idx].inbox_head[pri_idx] {
            let head = BlockId::from_index(head_raw as usize);
            let next = blocks[head.index()].flink;
            tasks[task_idx].inbox_head[pri_idx] = next.map(|n| n.index() as u16);
            if next.is_none() {
                tasks[task_idx].inbox_tail[pri_idx] = None;
            }
            return Some(head);
        }
    }
    None
}

/// Peek the most urgent non-empty inbox entry without dequeuing.
pub fn peek_highest<const N: usize>(tasks: &[TaskCb<N>], task_idx: usize) -> Option<BlockId> {
    tasks[task_idx]
        .inbox_head
        .iter()
        .find_map(|h| h.map(|raw| BlockId::from_index(raw as usize)))
}

/// Unlink every message at priority `from_pri_idx` and above into one chain
/// (concatenated highest to lowest priority), returning its head and tail if
/// non-empty. The caller is responsible for freeing the chain back to the
/// pool.
pub fn drain<const N: usize>(
    tasks: &mut [TaskCb<N>],
    blocks: &mut [MsgBlock],
    task_idx: usize,
    from_pri_idx: usize,
) -> Option<(BlockId, BlockId)> {
    let mut chain_head: Option<BlockId> = None;
    let mut chain_tail: Option<BlockId> = None;
    for pri_idx in from_pri_idx..tasks[task_idx].inbox_head.len() {
        let head = tasks[task_idx].inbox_head[pri_idx].take();
        let tail = tasks[task_idx].inbox_tail[pri_idx].take();
        let (Some(head), Some(tail)) = (head, tail) else {
            continue;
        };
        let head = BlockId::from_index(head as usize);
        let tail = BlockId::from_index(tail as usize);
        match chain_tail {
            Some(prev_tail) => blocks[prev_tail.index()].flink = Some(head),
            None => chain_head = Some(head),
        }
        chain_tail = Some(tail);
    }
    match (chain_head, chain_tail) {
        (Some(h), Some(t)) => Some((h, t)),
        _ => None,
    }
}

/// Free every block in a chain produced by [`drain`] back to the pool.
pub fn free_chain(blocks: &mut [MsgBlock], roots: &mut PoolRoots, mut head: Option<BlockId>) {
    while let Some(id) = head {
        head = blocks[id.index()].flink;
        pool_free(blocks, roots, id);
    }
}

/// Remove every message at `pri_idx` whose prefix and id match, freeing
/// matched blocks back to the pool. If `stop_after_first` is set, only the
/// first match is removed. Returns the number of blocks purged.
pub fn purge<const N: usize>(
    tasks: &mut [TaskCb<N>],
    blocks: &mut [MsgBlock],
    roots: &mut PoolRoots,
    task_idx: usize,
    pri_idx: usize,
    prefix: u16,
    id: u16,
    stop_after_first: bool,
) -> u32 {
    let mut purged = 0;
    let mut prev: Option<BlockId> = None;
    let mut cur = tasks[task_idx].inbox_head[pri_idx].map(|r| BlockId::from_index(r as usize));
    while let Some(cur_id) = cur {
        let next = blocks[cur_id.index()].flink;
        let matches =
            blocks[cur_id.index()].fields.prefix() == prefix && blocks[cur_id.index()].fields.id() == id;
        if matches {
            match prev {
                Some(p) => blocks[p.index()].flink = next,
                None => tasks[task_idx].inbox_head[pri_idx] = next.map(|n| n.index() as u16),
            }
            if tasks[task_idx].inbox_tail[pri_idx] == Some(cur_id.index() as u16) {
                tasks[task_idx].inbox_tail[pri_idx] = prev.map(|p| p.index() as u16);
            }
            pool_free(blocks, roots, cur_id);
            purged += 1;
            if stop_after_first {
                break;
            }
        } else {
            prev = Some(cur_id);
        }
        cur = next;
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(n: usize) -> Vec<TaskCb<4>> {
        vec![TaskCb::INIT; n]
    }

    #[test]
    fn fields_roundtrip() {
        let f = MsgFields::new(0x123, 0x2AB, 0x55, 2);
        assert_eq!(f.prefix(), 0x123);
        assert_eq!(f.id(), 0x2AB);
        assert_eq!(f.sending_task(), 0x55);
        assert_eq!(f.priority(), 2);
    }

    #[test]
    fn priority_ordering_on_dequeue() {
        let mut tasks = fresh(1);
        let mut blocks = vec![MsgBlock::INIT; 4];
        let mut roots = PoolRoots::INIT;
        pool_init(&mut blocks, &mut roots);

        let send = |blocks: &mut [MsgBlock], roots: &mut PoolRoots, tasks: &mut [TaskCb<4>], pri: usize, tag: u32| {
            let b = pool_alloc(blocks, roots).unwrap();
            blocks[b.index()].parameter = tag;
            enqueue(tasks, blocks, 0, pri, b);
        };
        send(&mut blocks, &mut roots, &mut tasks, 0, 1);
        send(&mut blocks, &mut roots, &mut tasks, 1, 2);
        send(&mut blocks, &mut roots, &mut tasks, 0, 3);
        send(&mut blocks, &mut roots, &mut tasks, 2, 4);

        let mut order = vec![];
        while let Some(b) = dequeue_highest(&mut tasks, &mut blocks, 0) {
            order.push(blocks[b.index()].parameter);
        }
        assert_eq!(order, vec![1, 3, 2, 4]);
    }

    #[test]
    fn free_count_restored_after_roundtrip() {
        let mut tasks = fresh(1);
        let mut blocks = vec![MsgBlock::INIT; 3];
        let mut roots = PoolRoots::INIT;
        pool_init(&mut blocks, &mut roots);
        assert_eq!(free_count(&blocks, &roots), 3);

        let b = pool_alloc(&mut blocks, &mut roots).unwrap();
        enqueue(&mut tasks, &mut blocks, 0, 0, b);
        assert_eq!(free_count(&blocks, &roots), 2);

        let recv = dequeue_highest(&mut tasks, &mut blocks, 0).unwrap();
        pool_free(&mut blocks, &mut roots, recv);
        assert_eq!(free_count(&blocks, &roots), 3);
    }

    #[test]
    fn drain_empties_every_priority() {
        let mut tasks = fresh(1);
        let mut blocks = vec![MsgBlock::INIT; 4];
        let mut roots = PoolRoots::INIT;
        pool_init(&mut blocks, &mut roots);
        for pri in 0..4 {
            let b = pool_alloc(&mut blocks, &mut roots).unwrap();
            enqueue(&mut tasks, &mut blocks, 0, pri, b);
        }
        let (head, _tail) = drain(&mut tasks, &mut blocks, 0, 0).unwrap();
        free_chain(&mut blocks, &mut roots, Some(head));
        assert_eq!(free_count(&blocks, &roots), 4);
        assert!(tasks[0].inbox_head.iter().all(|h| h.is_none()));
    }

    // Property-based: across any sequence of sends and receives, every block
    // is either free or sitting in exactly one priority's inbox (none lost,
    // none duplicated), and a receive always returns the oldest block queued
    // at the highest-priority non-empty inbox.
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug)]
    enum Cmd {
        Send(u8),
        Recv,
    }

    fn interpret(bytecode: &[u8], max_len: usize) -> impl Iterator<Item = Cmd> + '_ {
        bytecode.chunks(2).take(max_len).map(|chunk| {
            let opcode = chunk[0];
            let operand = chunk.get(1).copied().unwrap_or(0);
            if opcode % 2 == 0 {
                Cmd::Send(operand % 4)
            } else {
                Cmd::Recv
            }
        })
    }

    const TOTAL_BLOCKS: usize = 8;

    fn test_inner(bytecode: Vec<u8>) {
        let mut tasks = fresh(1);
        let mut blocks = vec![MsgBlock::INIT; TOTAL_BLOCKS];
        let mut roots = PoolRoots::INIT;
        pool_init(&mut blocks, &mut roots);

        let mut model: [VecDeque<u32>; 4] = Default::default();
        let mut next_tag = 0u32;

        log::debug!("bytecode len = {}", bytecode.len());

        for cmd in interpret(&bytecode, 100) {
            log::trace!("    {:?}", cmd);
            match cmd {
                Cmd::Send(pri) => {
                    if let Some(b) = pool_alloc(&mut blocks, &mut roots) {
                        blocks[b.index()].parameter = next_tag;
                        enqueue(&mut tasks, &mut blocks, 0, pri as usize, b);
                        model[pri as usize].push_back(next_tag);
                        next_tag += 1;
                    }
                }
                Cmd::Recv => {
                    let expected = model.iter_mut().find_map(|q| q.pop_front());
                    let got = dequeue_highest(&mut tasks, &mut blocks, 0);
                    match (expected, got) {
                        (Some(tag), Some(b)) => {
                            assert_eq!(blocks[b.index()].parameter, tag);
                            pool_free(&mut blocks, &mut roots, b);
                        }
                        (None, None) => {}
                        (e, g) => panic!("model/subject disagree on receive: {:?} vs {:?}", e, g),
                    }
                }
            }
            let queued: usize = model.iter().map(|q| q.len()).sum();
            assert_eq!(free_count(&blocks, &roots) + queued, TOTAL_BLOCKS);
        }
    }

    #[quickcheck_macros::quickcheck]
    fn pool_and_inbox_stay_consistent(bytecode: Vec<u8>) {
        test_inner(bytecode);
    }

    #[test]
    fn pool_and_inbox_consistent_on_regression_sequence() {
        let _ = env_logger::builder().is_test(true).try_init();
        test_inner(vec![0, 1, 2, 2, 0, 3, 1, 0, 4, 0, 1, 0, 0, 1, 2, 0, 1, 0, 1, 0]);
    }
}
