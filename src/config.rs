//! # Configuration
//!
//! Compile-time constants governing the scheduler and the other core
//! subsystems. All limits are fixed at compile time — no dynamic
//! allocation, no `alloc`.

/// Maximum number of tasks the system can manage simultaneously, idle task
/// included. This bounds the static TCB array. Increase with care — each
/// task consumes `STACK_SIZE` bytes of RAM.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. Determines scheduler tick granularity and the
/// unit of every duration ("ticks") in this crate.
pub const TICK_HZ: u32 = 1000;

/// Per-task stack size in bytes. Must be large enough for the deepest call
/// chain plus the hardware exception frame (32 bytes) and the
/// software-saved context (32 bytes for R4-R11).
pub const STACK_SIZE: usize = 1024;

/// Stack size of the idle task, which never calls into the rest of the
/// application and so needs far less room than a user task.
pub const IDLE_STACK_SIZE: usize = 256;

/// Magic pattern written to the low end of every task's stack region.
/// A context switch comparing this word against a different value signals
/// stack overflow.
pub const STACK_GUARD_PATTERN: u32 = 0xDEAD_BEEF;

/// Sentinel absolute deadline assigned to aperiodic tasks and to the idle
/// task, standing in for "infinity" under the EDF ordering.
pub const DEADLINE_NONE: u32 = 0xFFFF_FFFF;

/// Maximum number of memory pools that can be registered for per-tick
/// op-budget refill. A pool created beyond this limit still works, but its
/// `ops_remaining` is never replenished by the tick handler.
pub const MEMPOOL_MAX_POOLS: usize = 4;

/// Number of software timers drawn from the fixed timer pool.
pub const TIMER_POOL_SIZE: usize = 16;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
