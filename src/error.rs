//! Typed return values for every public kernel API.
//!
//! Concurrency outcomes — timeout, abort-by-message, key mismatch — are
//! first-class enumerator variants, not errors: a task legitimately waking
//! up because a higher-priority message arrived is not a failure. Only
//! structural misuse (bad id, wrong call context, exhausted pool) is an
//! error in the [`core::result::Result::Err`] sense.

/// A request referenced a task, semaphore, or priority outside the
/// configured range, or the current context is not allowed to make this
/// call (e.g. a blocking call from the background context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadParamError {
    BadTaskId,
    BadSemaId,
    BadBlockId,
    BadPriority,
    WrongContext,
    ZeroTimeout,
}

/// Outcome of [`crate::Kernel::bop_send`] / [`crate::Kernel::bop_send_with_key_override`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BopSendOutcome {
    Taken,
    KeyMismatch,
    TaskNotWaiting,
}

/// Outcome of [`crate::Kernel::bop_waitW`] / [`crate::Kernel::bop_waitT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BopWaitOutcome {
    Ok,
    AbortedByMessage,
    Timeout,
}

/// Outcome of a blocking semaphore acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaGetOutcome {
    OkNoBlock,
    Ok,
    Timeout,
    AbortedByMessage,
}

/// Outcome of [`crate::Kernel::msg_send`] / [`crate::Kernel::msg_send_by_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgSendOutcome {
    Ok,
    AwokeReceiver,
    AbortedReceiver,
}

/// Failure to send a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgSendError {
    BadParam(BadParamError),
    DestinationNotLaunched,
    PoolExhausted,
}

/// Outcome of a blocking message receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgGetOutcome {
    Received(crate::message::MsgFields, u32),
    Timeout,
    AbortedByMessage,
}

