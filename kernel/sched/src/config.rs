//! Compile-time scheduler configuration.

use muon_core::static_assert;

/// Maximum number of live tasks; pids are drawn from `[1, MAX_TASKS]`.
pub const MAX_TASKS: usize = 8;

/// Size of each task's stack page in bytes.
pub const TASK_STACK_SIZE: usize = 4096;

/// Size of the kernel (MSP) stack, reserved by the linker script.
pub const KERNEL_STACK_SIZE: usize = 8192;

/// xPSR seed for a freshly crafted task frame: Thumb state set.
pub const INITIAL_XPSR: u32 = 0x2100_0000;

/// Words in the hardware-stacked exception frame: r0-r3, r12, lr, pc, xPSR.
pub const HW_FRAME_WORDS: usize = 8;

/// Words in the software-saved frame below it: r4-r11.
pub const SW_FRAME_WORDS: usize = 8;

static_assert!(TASK_STACK_SIZE.is_power_of_two());
static_assert!(
    TASK_STACK_SIZE >= 4 * (HW_FRAME_WORDS + SW_FRAME_WORDS) + 4,
    "stack page cannot hold the initial frames"
);
static_assert!(MAX_TASKS >= 1);
