//! # Tick & Timebase
//!
//! The monotonic tick counter lives inside [`crate::scheduler::Scheduler`]
//! (`Scheduler::tick`, advanced once per call to [`on_tick`]); this module
//! is the orchestration the hardware tick ISR drives, in the fixed order
//! §4.2 specifies:
//!
//! 1. Increment the tick counter.
//! 2. Refill every registered memory pool's per-tick op budget.
//! 3. Advance the software-timer wheel.
//! 4. Scan the task list for periodic arrivals and expired delays.
//! 5. Invoke the scheduler if anything transitioned.

use crate::critical;
use crate::kernel;
use crate::mempool;
use crate::scheduler::Scheduler;
use crate::task::TaskState;
use crate::timer;

/// Monotonic ticks elapsed since `kernel::init`.
pub fn get_tick() -> u32 {
    kernel::with_scheduler(|sched| sched.tick)
}

/// Run one full tick, in the order §4.2 specifies: increment the counter,
/// refill pool op budgets, advance the timer wheel, scan for due task
/// wakeups, then reschedule if anything transitioned. Called from
/// [`crate::arch::cortex_m4::SysTick`].
///
/// The whole sequence runs under one outer critical section entered here
/// and held for the duration — `kernel::with_scheduler`'s own nested
/// enter/exit collapse into it, and so does `timer::on_tick`'s
/// exit-for-the-callback/re-enter pair (§4.9): the nesting counter only
/// drops to zero, and interrupts actually re-enable, while a timer
/// callback is running, never while this function is merely moving
/// between steps. Letting the mempool refill or the timer wheel run with
/// interrupts enabled between steps would violate §5's "all accesses …
/// bracketed by enter/exit critical".
pub fn on_tick() {
    critical::enter();

    let tick = kernel::with_scheduler(increment_tick);
    mempool::on_tick();
    timer::on_tick(tick);
    let woke = kernel::with_scheduler(|sched| scan_for_wakeups(sched, tick));
    if woke {
        kernel::with_scheduler(|sched| {
            sched.schedule(tick);
        });
    }

    critical::exit();
}

fn increment_tick(sched: &mut Scheduler) -> u32 {
    sched.tick = sched.tick.wrapping_add(1);
    sched.tick
}

/// Wake any task whose release or delay has come due. Only *periodic*
/// tasks are woken through `Waiting` + `arrival` — a task `Waiting` on a
/// semaphore or mutex is not subject to this scan (see `DESIGN.md`: the
/// spec's own invariant 3 scopes the `arrival`-driven wakeup to periodic
/// tasks, and the TCB's single `state` enum has no separate "blocked on
/// sync primitive" variant to otherwise distinguish the two).
fn scan_for_wakeups(sched: &mut Scheduler, tick: u32) -> bool {
    let mut woke = false;
    for i in 0..sched.task_count {
        let t = &mut sched.tasks[i];
        if !t.active {
            continue;
        }
        match t.state {
            TaskState::Waiting if t.period > 0 && t.arrival <= tick => {
                t.state = TaskState::Ready;
                woke = true;
            }
            TaskState::Delayed if t.wakeup_time <= tick => {
                t.state = TaskState::Ready;
                woke = true;
            }
            _ => {}
        }
    }
    woke
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskControlBlock;

    fn stack(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    extern "C" fn noop_entry(_p: *mut ()) -> ! {
        loop {}
    }

    #[test]
    fn tick_counter_advances_by_one() {
        let mut sched = Scheduler::new();
        sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap();
        let before = sched.tick;
        let tick = increment_tick(&mut sched);
        assert_eq!(tick, before + 1);
        assert_eq!(sched.tick, before + 1);
    }

    #[test]
    fn delayed_task_wakes_exactly_at_wakeup_time() {
        let mut sched = Scheduler::new();
        sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap(); // idle
        let id = sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap();
        sched.tasks[id].state = TaskState::Delayed;
        sched.tasks[id].wakeup_time = sched.tick + 3;

        for _ in 0..2 {
            let tick = increment_tick(&mut sched);
            let woke = scan_for_wakeups(&mut sched, tick);
            assert!(!woke);
            assert_eq!(sched.tasks[id].state, TaskState::Delayed);
        }
        let tick = increment_tick(&mut sched);
        let woke = scan_for_wakeups(&mut sched, tick);
        assert!(woke);
        assert_eq!(sched.tasks[id].state, TaskState::Ready);
    }

    #[test]
    fn periodic_arrival_wakes_a_waiting_task() {
        let mut sched = Scheduler::new();
        sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap(); // idle
        let id = sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 10, 10)
            .unwrap();
        sched.tasks[id].state = TaskState::Waiting;
        sched.tasks[id].arrival = sched.tick + 1;

        let first_tick = increment_tick(&mut sched);
        let first_woke = scan_for_wakeups(&mut sched, first_tick);
        assert!(!first_woke);
        let second_tick = increment_tick(&mut sched);
        let second_woke = scan_for_wakeups(&mut sched, second_tick);
        assert!(second_woke);
        assert_eq!(sched.tasks[id].state, TaskState::Ready);
    }

    #[test]
    fn a_sync_primitive_waiter_is_not_woken_by_arrival_scan() {
        // A task blocked in `sem_wait`/`mutex_lock` is `Waiting` with a
        // stale `arrival` left over from its last periodic release (or
        // creation time for an aperiodic task) — almost always <= any
        // future tick. Only a periodic task's own release should ever be
        // driven by this scan; an aperiodic task must stay `Waiting`
        // until something explicitly posts/unlocks to it.
        let mut sched = Scheduler::new();
        sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap(); // idle
        let id = sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0) // aperiodic
            .unwrap();
        sched.tasks[id].state = TaskState::Waiting;
        sched.tasks[id].arrival = 0;

        for _ in 0..5 {
            let tick = increment_tick(&mut sched);
            let woke = scan_for_wakeups(&mut sched, tick);
            assert!(!woke);
            assert_eq!(sched.tasks[id].state, TaskState::Waiting);
        }
    }

    #[allow(dead_code)]
    fn _silence_unused(_: &TaskControlBlock) {}
}
