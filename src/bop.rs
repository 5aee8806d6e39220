//! Bop: a single-slot, keyed, targeted wakeup (spec component C5).
//!
//! A bop carries no payload and queues nothing — at most one bop is ever
//! "in flight" to a task, represented entirely by that task's `bop_key` and
//! its `BLOCKED_BOP` bit. There is intentionally no pre-arrival queue: a
//! `send` to a task that is not yet waiting returns
//! [`BopSendResult::TaskNotWaiting`] rather than latching anything for a
//! later `waitW`/`waitT` to pick up (see the reserved, unused
//! `BOP_PRE_ARRIVED` status bit).
use crate::tcb::{BlockFlags, Statuses, TaskCb};

/// Advance the monotonically increasing key seed, skipping zero (zero is
/// not a valid key, so that an uninitialized `bop_key` field can never
/// accidentally match).
pub fn next_key(seed: &mut u16) -> u16 {
    *seed = seed.wrapping_add(1);
    if *seed == 0 {
        *seed = 1;
    }
    *seed
}

/// The key last handed out by `next_key`, without minting a new one. The
/// seed doubles as "the last issued key" between calls, so this is just a
/// read.
pub fn current_key(seed: u16) -> u16 {
    seed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BopSendResult {
    /// Target was waiting and is now unblockable; caller must insert it
    /// into the ready list.
    Taken,
    /// Target was waiting but bop-locked; its `BLOCKED_BOP` bit has been
    /// cleared, but it must not be made ready until unlocked.
    TakenButLocked,
    KeyMismatch,
    TaskNotWaiting,
}

/// Check and, on success, consume a bop directed at `dest_idx`.
///
/// Does not touch the ready list; the caller inserts the destination into
/// it when the result is [`BopSendResult::Taken`].
pub fn send_core<const N: usize>(
    tasks: &mut [TaskCb<N>],
    dest_idx: usize,
    key: u16,
    override_key: bool,
) -> BopSendResult {
    if !tasks[dest_idx].block_flags.contains(BlockFlags::BOP) {
        return BopSendResult::TaskNotWaiting;
    }
    if !override_key && tasks[dest_idx].bop_key != key {
        return BopSendResult::KeyMismatch;
    }
    tasks[dest_idx].block_flags.remove(BlockFlags::BOP);
    if tasks[dest_idx].statuses.contains(Statuses::BOP_LOCKED) {
        BopSendResult::TakenButLocked
    } else {
        BopSendResult::Taken
    }
}
