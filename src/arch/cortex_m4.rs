//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! interrupt priority setup, and initial-stack-frame seeding for the EDF
//! scheduler in [`crate::scheduler`].
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest) — can be preempted
//! - PendSV: Priority 0xFF (lowest) — runs only when no other ISR is active
//!
//! Both are set to the lowest priority so PendSV never preempts another
//! application ISR (§5: "the deferred context-switch interrupt runs at the
//! lowest priority so that all other ISRs complete before a switch").
//!
//! ## Host test builds
//!
//! Everything that touches real MMIO or emits architecture-specific
//! assembly is gated behind `target_arch = "arm"`. `init_task_stack` is
//! plain pointer arithmetic and is the one function `scheduler.rs`'s
//! `#[cfg(test)]` module exercises directly on the host; the rest only
//! matter to real firmware.

use core::arch::asm;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::task::TaskEntry;

// ---------------------------------------------------------------------------
// Initial stack frame seeding
// ---------------------------------------------------------------------------

/// Number of words in a full saved context: 8 software-saved callee registers
/// (R4–R11) plus the 8-word hardware exception frame (R0–R3, R12, LR, PC,
/// xPSR).
const FRAME_WORDS: usize = 16;

/// Seed a fresh task's stack so that the first resumption — whether via
/// [`start_first_task`] or via [`PendSV`] — pops a frame identical to one
/// left behind by a real preemption, landing in `entry(parameter)`.
///
/// `stack_top` is rounded down to an 8-byte boundary (AAPCS). Returns the
/// stack pointer to store in the new task's TCB.
///
/// # Safety
/// `stack_top` must point strictly above at least `FRAME_WORDS * 4` bytes
/// of writable memory belonging to the task's stack region.
pub unsafe fn init_task_stack(
    entry: TaskEntry,
    parameter: *mut (),
    stack_top: *mut u32,
) -> *mut u32 {
    let top = (stack_top as usize) & !0x7;
    let frame = (top - FRAME_WORDS * 4) as *mut u32;

    // R4-R11: callee-saved, zero-initialized — their values are never
    // observed before the task's own prologue overwrites them.
    for i in 0..8 {
        core::ptr::write_volatile(frame.add(i), 0);
    }

    // Hardware-stacked frame, in the order the Cortex-M exception entry
    // pushes it: R0, R1, R2, R3, R12, LR, PC, xPSR.
    core::ptr::write_volatile(frame.add(8), parameter as usize as u32); // R0: first ABI argument
    core::ptr::write_volatile(frame.add(9), 0); // R1
    core::ptr::write_volatile(frame.add(10), 0); // R2
    core::ptr::write_volatile(frame.add(11), 0); // R3
    core::ptr::write_volatile(frame.add(12), 0); // R12
    core::ptr::write_volatile(frame.add(13), 0); // LR — entry never returns
    core::ptr::write_volatile(frame.add(14), entry as usize as u32); // PC
    core::ptr::write_volatile(frame.add(15), 0x0100_0000); // xPSR: Thumb bit set

    frame
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer to fire at `TICK_HZ`. Each tick invokes
/// [`SysTick`], which drives [`crate::tick::on_tick`].
#[cfg(target_arch = "arm")]
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    use cortex_m::peripheral::syst::SystClkSource;
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

#[cfg(not(target_arch = "arm"))]
pub fn configure_systick(_syst: &mut cortex_m::peripheral::SYST) {}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend the deferred context-switch exception by setting PENDSVSET in the
/// Interrupt Control and State Register (ICSR, `0xE000_ED04`, bit 28).
#[cfg(target_arch = "arm")]
#[inline]
pub fn trigger_pendsv() {
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

#[cfg(not(target_arch = "arm"))]
#[inline]
pub fn trigger_pendsv() {}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority (SHPR3,
/// `0xE000_ED20`), so neither ever preempts an application-level ISR.
#[cfg(target_arch = "arm")]
pub fn set_interrupt_priorities() {
    unsafe {
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

#[cfg(not(target_arch = "arm"))]
pub fn set_interrupt_priorities() {}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch to PSP, enter Thread mode, and branch into the first task's
/// entry point via a fabricated exception return. Called once from
/// `kernel::start` and never returns.
///
/// # Safety
/// Must be called exactly once, with the stack pointer of a task whose
/// frame was seeded by [`init_task_stack`].
#[cfg(target_arch = "arm")]
pub unsafe fn start_first_task(psp: *const u32) {
    asm!(
        "adds r0, #32",        // skip the 8 software-saved registers (R4-R11)
        "msr psp, r0",

        "movs r0, #2",         // CONTROL.SPSEL = 1: Thread mode now uses PSP
        "msr control, r0",
        "isb",

        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR, discarded — entry() is noreturn
        "pop {{r5}}",          // PC — task entry point
        "pop {{r6}}",          // xPSR, discarded — set by the processor

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

#[cfg(not(target_arch = "arm"))]
pub unsafe fn start_first_task(_psp: *const u32) {
    unreachable!("start_first_task requires a Cortex-M target");
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// 1. Save R4–R11 onto the outgoing task's stack (PSP).
/// 2. Commit the switch the scheduler already decided in `schedule()`.
/// 3. Restore R4–R11 from the incoming task's stack.
/// 4. Return from exception; hardware restores R0–R3, R12, LR, PC, xPSR.
///
/// # Safety
/// Naked function invoked directly by the NVIC; must follow the exact
/// Cortex-M4 exception entry/exit convention.
#[cfg(target_arch = "arm")]
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {commit_switch}",      // commit_switch(outgoing_psp: *mut u32) -> incoming_psp

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, =0xFFFFFFFD",     // EXC_RETURN: Thread mode, PSP, no FP
        "bx r0",

        commit_switch = sym commit_switch,
        options(noreturn)
    );
}

/// Store the outgoing task's saved stack pointer and return the incoming
/// one, per [`crate::scheduler::Scheduler::commit_switch`].
///
/// # Safety
/// Called only from [`PendSV`], with interrupts disabled and `r0` pointing
/// at the top of the just-saved software context.
#[cfg(target_arch = "arm")]
#[no_mangle]
unsafe extern "C" fn commit_switch(outgoing_psp: *mut u32) -> *mut u32 {
    let scheduler = &mut *crate::kernel::SCHEDULER_PTR;
    let outgoing = scheduler.current_task;
    if outgoing < scheduler.task_count {
        scheduler.tasks[outgoing].stack_pointer = outgoing_psp;
    }
    scheduler.commit_switch()
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — the scheduler's tick entry point. Runs the
/// full tick sequence from §4.2 via [`crate::tick::on_tick`].
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::tick::on_tick();
}
