//! Identifiers and the task priority type.

/// Index of a task within a [`Kernel`](crate::Kernel)'s static task table.
///
/// Constructed by the integrator to name one of the tasks configured in its
/// `TaskDesc` array (`TaskId::new(0)` is the task at index 0, and so on);
/// [`Kernel`](crate::Kernel) never hands one out on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u16);

impl TaskId {
    #[inline]
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u16)
    }
}

/// Index of a semaphore within a [`Kernel`](crate::Kernel)'s static semaphore table.
///
/// Constructed by the integrator to name one of the semaphores configured
/// via `Kernel::new`'s `sema_init` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaId(pub(crate) u16);

impl SemaId {
    #[inline]
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u16)
    }
}

/// Opaque handle to a message block within a [`Kernel`](crate::Kernel)'s
/// static block pool, returned by [`crate::Kernel::msg_get_block`] and
/// consumed by [`crate::Kernel::msg_send_by_block`]/[`crate::Kernel::msg_free_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u16);

impl BlockId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u16)
    }
}

/// A task priority. Lower numeric value runs first.
///
/// `0` is reserved (unused/null) and `1` is [`Priority::GUARANTEED_HIGHEST`],
/// reserved for [`crate::Kernel::prioritize`]; application tasks must be
/// configured at priority 2 or numerically greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const NONE: Priority = Priority(0);
    pub const GUARANTEED_HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(254);

    #[inline]
    pub fn is_valid_task_priority(self) -> bool {
        self.0 > Self::GUARANTEED_HIGHEST.0 && self.0 <= Self::LOWEST.0
    }
}
