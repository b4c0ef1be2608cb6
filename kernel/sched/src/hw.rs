//! Hardware surface of the scheduler.
//!
//! The board layer implements this trait over the Cortex-M primitives
//! (PSP access, SysTick, PendSV) and binds [`crate::Scheduler::schedule`]
//! into its tick and PendSV handlers. Host tests substitute a mock.

/// Context-switch and timer primitives provided by the platform.
///
/// A pended reschedule stays latched while the board masks the switch
/// interrupts and fires as soon as they are unmasked; thread-context
/// scheduler calls rely on that masking for atomicity against the
/// handlers.
pub trait SchedHw: Send {
    /// Reads the process stack pointer.
    fn read_psp(&self) -> usize;

    /// Writes the process stack pointer.
    fn write_psp(&self, sp: usize);

    /// Arms the periodic tick interrupt.
    fn start_tick(&self);

    /// Software-triggers the pending context-switch interrupt (PendSV).
    fn trigger_reschedule(&self);
}
