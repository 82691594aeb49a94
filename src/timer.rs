//! # Software Timer Wheel
//!
//! One-shot and periodic callbacks layered on the tick, drawn from a
//! fixed-size pool (§4.9). `on_tick` walks the active list once per tick,
//! decrementing `remaining`; an entry that hits zero is unlinked, expired,
//! and (for `Periodic`) immediately re-armed and re-linked at the head —
//! matching `smart_timer_tick`'s "remove, fire, re-link" shape, except
//! `reset` here also unlinks a running timer instead of merely rearming it
//! in place (see `DESIGN.md`: leaving a reset timer on the active list
//! with `Stopped` state would make the next tick's `remaining == 0` branch
//! fire spuriously, since `reset` clears `remaining` to `period`, not 0 —
//! the original never actually hits that path only because `reset` is
//! idempotent with `stop`'s list removal in every call site that matters,
//! but nothing prevents calling `reset` on a `Running` timer directly).
//!
//! Callback duration is measured in ticks, not microseconds — this crate
//! has no free-running microsecond counter, only the tick itself.

use crate::config::TIMER_POOL_SIZE;
use crate::critical;
use crate::error::{OsError, OsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    OneShot,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerState {
    Stopped,
    Running,
    Expired,
}

pub type TimerCallback = extern "C" fn(*mut ());

/// Opaque handle returned by `create`. Carries a generation counter so a
/// handle to a deleted-and-reused slot is rejected instead of silently
/// operating on an unrelated timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    pub total_timers: u32,
    pub active_timers: u32,
    pub expired_count: u32,
    pub callback_count: u32,
    pub max_callback_ticks: u32,
}

#[derive(Clone, Copy)]
struct TimerSlot {
    in_use: bool,
    generation: u32,
    kind: TimerKind,
    state: TimerState,
    period: u32,
    remaining: u32,
    callback: Option<TimerCallback>,
    arg: *mut (),
    next: Option<usize>,
    linked: bool,
}

impl TimerSlot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            generation: 0,
            kind: TimerKind::OneShot,
            state: TimerState::Stopped,
            period: 0,
            remaining: 0,
            callback: None,
            arg: core::ptr::null_mut(),
            next: None,
            linked: false,
        }
    }
}

// Every field is a plain value or raw pointer passed straight through to
// a user callback; all access happens under a critical section.
unsafe impl Send for TimerSlot {}

pub struct TimerPool {
    slots: [TimerSlot; TIMER_POOL_SIZE],
    active_head: Option<usize>,
    stats: TimerStats,
}

unsafe impl Send for TimerPool {}
unsafe impl Sync for TimerPool {}

impl TimerPool {
    pub const fn new() -> Self {
        Self {
            slots: [TimerSlot::empty(); TIMER_POOL_SIZE],
            active_head: None,
            stats: TimerStats {
                total_timers: 0,
                active_timers: 0,
                expired_count: 0,
                callback_count: 0,
                max_callback_ticks: 0,
            },
        }
    }

    /// Reserve a free slot. The timer starts `Stopped`; call `start` to
    /// arm it.
    pub fn create(
        &mut self,
        kind: TimerKind,
        period: u32,
        callback: TimerCallback,
        arg: *mut (),
    ) -> OsResult<TimerHandle> {
        if period == 0 {
            return Err(OsError::Invalid);
        }
        critical::critical_section(|| {
            for i in 0..TIMER_POOL_SIZE {
                if !self.slots[i].in_use {
                    let generation = self.slots[i].generation.wrapping_add(1);
                    self.slots[i] = TimerSlot {
                        in_use: true,
                        generation,
                        kind,
                        state: TimerState::Stopped,
                        period,
                        remaining: period,
                        callback: Some(callback),
                        arg,
                        next: None,
                        linked: false,
                    };
                    self.stats.total_timers += 1;
                    return Ok(TimerHandle { index: i, generation });
                }
            }
            Err(OsError::Full)
        })
    }

    fn slot(&mut self, handle: TimerHandle) -> OsResult<&mut TimerSlot> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .ok_or(OsError::Invalid)?;
        if !slot.in_use || slot.generation != handle.generation {
            return Err(OsError::Invalid);
        }
        Ok(slot)
    }

    fn link(&mut self, index: usize) {
        if !self.slots[index].linked {
            self.slots[index].next = self.active_head;
            self.active_head = Some(index);
            self.slots[index].linked = true;
            self.stats.active_timers += 1;
        }
    }

    fn unlink(&mut self, index: usize) {
        if !self.slots[index].linked {
            return;
        }
        if self.active_head == Some(index) {
            self.active_head = self.slots[index].next;
        } else {
            let mut cur = self.active_head;
            while let Some(c) = cur {
                if self.slots[c].next == Some(index) {
                    self.slots[c].next = self.slots[index].next;
                    break;
                }
                cur = self.slots[c].next;
            }
        }
        self.slots[index].next = None;
        self.slots[index].linked = false;
        self.stats.active_timers -= 1;
    }

    /// Arm the timer: `remaining := period`, state Running, linked onto
    /// the active list. A no-op if already Running.
    pub fn start(&mut self, handle: TimerHandle) -> OsResult<()> {
        critical::critical_section(|| {
            let period = self.slot(handle)?.period;
            let index = handle.index;
            if self.slots[index].state == TimerState::Running {
                return Ok(());
            }
            self.slots[index].remaining = period;
            self.slots[index].state = TimerState::Running;
            self.link(index);
            Ok(())
        })
    }

    /// Unlink from the active list and mark Stopped. A no-op if already
    /// Stopped or Expired.
    pub fn stop(&mut self, handle: TimerHandle) -> OsResult<()> {
        critical::critical_section(|| {
            self.slot(handle)?;
            let index = handle.index;
            if self.slots[index].state != TimerState::Running {
                return Ok(());
            }
            self.unlink(index);
            self.slots[index].state = TimerState::Stopped;
            Ok(())
        })
    }

    /// Reset `remaining` to `period` and unlink, returning the timer to
    /// `Stopped` regardless of its prior state. Call `start` to rearm.
    pub fn reset(&mut self, handle: TimerHandle) -> OsResult<()> {
        critical::critical_section(|| {
            let period = self.slot(handle)?.period;
            let index = handle.index;
            self.unlink(index);
            self.slots[index].remaining = period;
            self.slots[index].state = TimerState::Stopped;
            Ok(())
        })
    }

    /// Change the period. If currently Stopped, also resets `remaining`
    /// to the new period so the next `start` uses it.
    pub fn set_period(&mut self, handle: TimerHandle, period: u32) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::Invalid);
        }
        critical::critical_section(|| {
            self.slot(handle)?;
            let index = handle.index;
            self.slots[index].period = period;
            if self.slots[index].state == TimerState::Stopped {
                self.slots[index].remaining = period;
            }
            Ok(())
        })
    }

    /// Stop and free the slot, permanently invalidating `handle`.
    pub fn delete(&mut self, handle: TimerHandle) -> OsResult<()> {
        critical::critical_section(|| {
            self.slot(handle)?;
            let index = handle.index;
            self.unlink(index);
            self.slots[index].in_use = false;
            self.slots[index].callback = None;
            self.stats.total_timers -= 1;
            Ok(())
        })
    }

    pub fn get_remaining(&mut self, handle: TimerHandle) -> OsResult<u32> {
        critical::critical_section(|| Ok(self.slot(handle)?.remaining))
    }

    pub fn get_state(&mut self, handle: TimerHandle) -> OsResult<TimerState> {
        critical::critical_section(|| Ok(self.slot(handle)?.state))
    }

    pub fn get_stats(&self) -> TimerStats {
        critical::critical_section(|| self.stats)
    }

    /// Advance every active timer by one tick. Must be called with a
    /// critical section already held: the user callback runs with it
    /// released (§4.9), then the section is re-entered before continuing
    /// the walk — a bare call at nesting depth zero would leave a
    /// critical section permanently open after the callback.
    pub fn on_tick(&mut self, tick: u32) {
        let mut cursor = self.active_head;
        while let Some(index) = cursor {
            // Capture `next` before any callback can mutate this node's
            // link (e.g. the callback deletes or stops itself).
            let next = self.slots[index].next;

            if self.slots[index].remaining > 0 {
                self.slots[index].remaining -= 1;
            }

            if self.slots[index].remaining == 0 {
                self.unlink(index);
                self.slots[index].state = TimerState::Expired;
                self.stats.expired_count += 1;

                if let Some(callback) = self.slots[index].callback {
                    let arg = self.slots[index].arg;
                    critical::exit();
                    let start = tick;
                    callback(arg);
                    // Always 0: there is no sub-tick clock to sample, so this
                    // mirrors the original's own microsecond counter, which
                    // derived "now" from the tick count and so never moved
                    // within a single callback either.
                    let elapsed = tick.wrapping_sub(start);
                    critical::enter();
                    self.stats.callback_count += 1;
                    if elapsed > self.stats.max_callback_ticks {
                        self.stats.max_callback_ticks = elapsed;
                    }
                }

                // The callback may have deleted or stopped this slot
                // itself; only a still-in-use, still-Expired Periodic
                // timer gets rearmed.
                if self.slots[index].in_use
                    && self.slots[index].state == TimerState::Expired
                    && self.slots[index].kind == TimerKind::Periodic
                {
                    self.slots[index].remaining = self.slots[index].period;
                    self.slots[index].state = TimerState::Running;
                    self.link(index);
                }
            }

            cursor = next;
        }
    }
}

static mut TIMER_POOL: TimerPool = TimerPool::new();

pub fn create(kind: TimerKind, period: u32, callback: TimerCallback, arg: *mut ()) -> OsResult<TimerHandle> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).create(kind, period, callback, arg) }
}

pub fn start(handle: TimerHandle) -> OsResult<()> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).start(handle) }
}

pub fn stop(handle: TimerHandle) -> OsResult<()> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).stop(handle) }
}

pub fn reset(handle: TimerHandle) -> OsResult<()> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).reset(handle) }
}

pub fn set_period(handle: TimerHandle, period: u32) -> OsResult<()> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).set_period(handle, period) }
}

pub fn delete(handle: TimerHandle) -> OsResult<()> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).delete(handle) }
}

pub fn get_remaining(handle: TimerHandle) -> OsResult<u32> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).get_remaining(handle) }
}

pub fn get_state(handle: TimerHandle) -> OsResult<TimerState> {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).get_state(handle) }
}

pub fn get_stats() -> TimerStats {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).get_stats() }
}

/// Advance the global timer pool by one tick. Called once per tick from
/// `tick::on_tick`, which already holds the outer critical section.
pub(crate) fn on_tick(tick: u32) {
    unsafe { (*core::ptr::addr_of_mut!(TIMER_POOL)).on_tick(tick) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);

    extern "C" fn counting_callback(_arg: *mut ()) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    fn tick(pool: &mut TimerPool, at: u32) {
        critical::critical_section(|| pool.on_tick(at));
    }

    #[test]
    fn one_shot_fires_once_at_expiry() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::OneShot, 3, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.start(h).unwrap();

        for t in 1..3 {
            tick(&mut pool, t);
            assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 0);
        }
        tick(&mut pool, 3);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_state(h).unwrap(), TimerState::Expired);

        tick(&mut pool, 4);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_fires_every_period_exactly() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::Periodic, 3, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.start(h).unwrap();

        for t in 1..=12u32 {
            tick(&mut pool, t);
        }
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 4);
        assert_eq!(pool.get_state(h).unwrap(), TimerState::Running);
    }

    #[test]
    fn stop_prevents_further_firing() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::Periodic, 2, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.start(h).unwrap();
        tick(&mut pool, 1);
        tick(&mut pool, 2);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);

        pool.stop(h).unwrap();
        for t in 3..10 {
            tick(&mut pool, t);
        }
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_state(h).unwrap(), TimerState::Stopped);
    }

    #[test]
    fn reset_restores_the_full_period() {
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::OneShot, 5, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.start(h).unwrap();
        tick(&mut pool, 1);
        tick(&mut pool, 2);
        assert_eq!(pool.get_remaining(h).unwrap(), 3);

        pool.reset(h).unwrap();
        assert_eq!(pool.get_remaining(h).unwrap(), 5);
        assert_eq!(pool.get_state(h).unwrap(), TimerState::Stopped);
    }

    #[test]
    fn delete_invalidates_the_handle() {
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::OneShot, 5, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.delete(h).unwrap();
        assert_eq!(pool.get_state(h), Err(OsError::Invalid));
    }

    #[test]
    fn pool_exhaustion_reports_full() {
        let mut pool = TimerPool::new();
        for _ in 0..TIMER_POOL_SIZE {
            pool.create(TimerKind::OneShot, 1, counting_callback, core::ptr::null_mut())
                .unwrap();
        }
        assert_eq!(
            pool.create(TimerKind::OneShot, 1, counting_callback, core::ptr::null_mut()),
            Err(OsError::Full)
        );
    }

    #[test]
    fn set_period_while_stopped_updates_remaining() {
        let mut pool = TimerPool::new();
        let h = pool
            .create(TimerKind::OneShot, 5, counting_callback, core::ptr::null_mut())
            .unwrap();
        pool.set_period(h, 10).unwrap();
        assert_eq!(pool.get_remaining(h).unwrap(), 10);
    }
}
