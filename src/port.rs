//! The interface the kernel core expects from the platform it runs on.
//!
//! Everything CPU-specific — disabling interrupts, constructing the initial
//! stack frame for a task, requesting a context switch — lives behind this
//! trait. The core never touches a register or an interrupt controller
//! directly.

/// Platform hooks required by [`Kernel`](crate::Kernel).
///
/// All methods are called with interrupts already disabled except where
/// noted, and none of them may block.
pub trait Port {
    /// Disable interrupts and return an opaque token describing the prior
    /// state, so that nested calls restore the correct state on unwind.
    ///
    /// # Safety
    ///
    /// Must be paired with exactly one call to [`Self::unlock_interrupts`]
    /// with the returned value, with no task switch occurring in between.
    unsafe fn lock_interrupts() -> usize;

    /// Restore the interrupt state captured by a prior [`Self::lock_interrupts`].
    ///
    /// # Safety
    ///
    /// `saved` must be a value previously returned by [`Self::lock_interrupts`].
    unsafe fn unlock_interrupts(saved: usize);

    /// Ask the CPU to perform a context switch at the next safe point. On
    /// targets with a pendable software interrupt this pends it; on targets
    /// without one, implementations may defer to [`Self::secondary_context_switch`].
    fn invoke_context_switch();

    /// Called by the kernel at the end of every public API after the
    /// critical section has been released, so that targets without a
    /// pendable software interrupt get a chance to switch context.
    ///
    /// The default implementation does nothing; most targets only need
    /// [`Self::invoke_context_switch`].
    fn secondary_context_switch() {}

    /// Construct the initial register/stack frame for a task so that, once
    /// switched to, it begins executing `entry(param)` and, should `entry`
    /// return, falls through to `exit_trampoline`.
    ///
    /// Returns the initial stack pointer to store in the task's control
    /// block.
    ///
    /// # Safety
    ///
    /// `stack_base` must point to at least `stack_size` bytes of memory
    /// reserved exclusively for this task's stack, valid for the entire
    /// lifetime of the task.
    unsafe fn prepare_stack(
        stack_base: *mut u8,
        stack_size: usize,
        entry: fn(usize),
        entry_param: usize,
        exit_trampoline: fn() -> !,
    ) -> *mut u8;

    /// Called when an internal invariant is violated. Must not return.
    fn contract_failure(file: &'static str, line: u32) -> ! {
        let _ = (file, line);
        panic!("kernel contract violated at {file}:{line}")
    }
}
