//! # Kernel
//!
//! Top-level initialization and the public task/critical-section API. The
//! kernel owns the single global [`Scheduler`] instance and the idle task;
//! everything else (mempool, msgqueue, sync, timer) is a free-standing
//! module that only needs a `&mut Scheduler` borrowed through
//! [`with_scheduler`] for the moment it touches task state.
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← register the idle task
//!         ├─► kernel::create_task() ← register application tasks (×N)
//!         └─► kernel::start()       ← launch the scheduler (no return)
//!               ├─► configure SysTick
//!               ├─► set interrupt priorities
//!               └─► start the first task via arch::start_first_task
//! ```

use crate::arch::cortex_m4;
use crate::config::IDLE_STACK_SIZE;
use crate::critical;
use crate::error::OsResult;
use crate::scheduler::Scheduler;
use crate::task::{TaskEntry, TaskSnapshot, TaskState};

/// Global scheduler instance.
///
/// # Safety
/// All access goes through [`with_scheduler`] (critical-section guarded)
/// or, in the arch layer, through [`SCHEDULER_PTR`] from within an ISR —
/// contexts the single-core critical-section model already serializes.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler, used by `arch::cortex_m4`'s
/// naked exception handlers, which cannot hold a safe `&mut` across the
/// asm/Rust boundary.
///
/// # Safety
/// Set once by `init()`, read only from `PendSV` with the CPU already in
/// exception context (no other code can run concurrently with it).
#[no_mangle]
pub static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];

extern "C" fn idle_task(_parameter: *mut ()) -> ! {
    loop {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

/// Run `f` with exclusive, critical-section-guarded access to the global
/// scheduler. Every public kernel/sync/timer entry point that reads or
/// mutates task state goes through this single call so a caller never
/// holds the scheduler across more than one critical section — doing the
/// state mutation and the `schedule()` call in two separate acquisitions
/// would let an interrupt observe a half-updated task between them.
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    critical::critical_section(|| unsafe { f(&mut *core::ptr::addr_of_mut!(SCHEDULER)) })
}

/// Initialize the kernel: reset the scheduler and register the idle
/// task at index 0. Must be called exactly once, before any call to
/// `create_task` or `start`.
pub fn init() {
    unsafe {
        SCHEDULER = Scheduler::new();
        SCHEDULER_PTR = core::ptr::addr_of_mut!(SCHEDULER);
    }
    with_scheduler(|sched| {
        sched
            .create_task(
                idle_task,
                core::ptr::null_mut(),
                unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) },
                0,
                0,
            )
            .expect("idle task registration cannot fail on a freshly reset scheduler");
    });
}

/// Register a new task. `stack` must outlive the kernel — a `'static
/// mut` byte array the caller owns (typically a `static mut` buffer).
/// `period == 0` marks an aperiodic task, which never misses a deadline
/// by construction (§4.4).
pub fn create_task(
    entry: TaskEntry,
    parameter: *mut (),
    stack: &'static mut [u8],
    period: u32,
    relative_deadline: u32,
) -> OsResult<usize> {
    with_scheduler(|sched| sched.create_task(entry, parameter, stack, period, relative_deadline))
}

/// Index of the task currently loaded on the CPU.
pub fn get_current() -> usize {
    with_scheduler(|sched| sched.current_task)
}

/// A critical-section-guarded snapshot of every registered task's
/// statistics, in task-list order (idle first).
pub fn get_task_list_snapshot(out: &mut [Option<TaskSnapshot>]) {
    with_scheduler(|sched| {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if i < sched.task_count {
                Some(TaskSnapshot::of(&sched.tasks[i]))
            } else {
                None
            };
        }
    });
}

/// Voluntarily give up the CPU. A periodic task is marked `Waiting` and
/// its next release (`arrival`, `deadline`) is advanced by one period; an
/// aperiodic task simply stays `Ready`, inviting preemption by anything
/// else that is also Ready. Either way the scheduler is invoked before
/// returning.
pub fn yield_task() {
    with_scheduler(|sched| {
        let tick = sched.tick;
        let cur = sched.current_task;
        let t = &mut sched.tasks[cur];
        if t.period > 0 {
            t.state = TaskState::Waiting;
            t.arrival = t.arrival.wrapping_add(t.period);
            t.deadline = t.deadline.wrapping_add(t.period);
        }
        sched.schedule(tick);
    });
}

/// Put the current task to sleep for `ticks` ticks. A `ticks == 0` call
/// is a no-op (matching `delay`'s own "if ticks > 0" guard in §4.4) —
/// the task keeps running rather than round-tripping through the
/// scheduler for nothing.
pub fn delay(ticks: u32) {
    if ticks == 0 {
        return;
    }
    with_scheduler(|sched| {
        let tick = sched.tick;
        let cur = sched.current_task;
        let t = &mut sched.tasks[cur];
        t.wakeup_time = tick.wrapping_add(ticks);
        t.state = TaskState::Delayed;
        sched.schedule(tick);
    });
}

/// Enter a nested critical section. Pairs with [`exit_critical`].
pub fn enter_critical() {
    critical::enter();
}

/// Leave a nested critical section entered via [`enter_critical`].
pub fn exit_critical() {
    critical::exit();
}

/// Configure the tick timer and interrupt priorities, then launch the
/// first task. **Does not return.**
///
/// # Safety
/// `init()` must have already run and at least one application task
/// must have been created; must be called from the main thread, not an
/// ISR.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    let first_sp = with_scheduler(|sched| {
        let tick = sched.tick;
        let first = sched.schedule(tick);
        sched.tasks[first].stack_pointer as *const u32
    });

    unsafe {
        cortex_m4::start_first_task(first_sp);
    }
}
