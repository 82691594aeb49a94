//! # Semaphore & Mutex
//!
//! Counting semaphore and recursive, deadline-inheriting mutex. Both sit
//! directly on [`crate::scheduler::Scheduler`] rather than going through
//! [`crate::kernel::yield_task`]: the original's `smart_sem_wait` enqueues
//! the caller as `Waiting` and then calls its generic yield helper, which
//! branches on `period > 0` and — for an aperiodic task, the common case
//! for something blocking on a semaphore — sets the task straight back to
//! `Ready`, undoing the block it just performed. Calling `schedule`
//! directly, as §4.7/§4.8 literally describe ("invoke the scheduler"),
//! sidesteps that path entirely (see `DESIGN.md`).
//!
//! Every operation is implemented twice over: a `*_with(&mut Scheduler)`
//! method holding the real logic, and a thin public wrapper that acquires
//! the global scheduler via [`crate::kernel::with_scheduler`] and calls
//! it. Tests exercise the `_with` methods against a local `Scheduler`
//! directly, the same pattern `scheduler.rs`'s own tests use, instead of
//! touching global kernel state.
//!
//! Both primitives thread their wait lists through the same
//! `TaskControlBlock::next` field the task list itself stays out of (a
//! task is never on both at once — invariant 3, §8).

use crate::config::DEADLINE_NONE;
use crate::error::{OsError, OsResult};
use crate::kernel::{self, with_scheduler};
use crate::scheduler::Scheduler;
use crate::task::TaskState;

/// Enqueue task `id` at the tail of the intrusive list rooted at `*head`.
fn enqueue(sched: &mut Scheduler, head: &mut Option<usize>, id: usize) {
    sched.tasks[id].next = None;
    match *head {
        None => *head = Some(id),
        Some(mut cur) => {
            while let Some(next) = sched.tasks[cur].next {
                cur = next;
            }
            sched.tasks[cur].next = Some(id);
        }
    }
}

/// Remove and return the task at the head of `*head` (strict FIFO).
fn dequeue_front(sched: &mut Scheduler, head: &mut Option<usize>) -> Option<usize> {
    let front = (*head)?;
    *head = sched.tasks[front].next;
    sched.tasks[front].next = None;
    Some(front)
}

/// Remove and return the task with the smallest `deadline` in `*head`
/// (EDF order), breaking ties by list position.
fn dequeue_min_deadline(sched: &mut Scheduler, head: &mut Option<usize>) -> Option<usize> {
    let mut best = (*head)?;
    let mut best_prev: Option<usize> = None;
    let mut prev: Option<usize> = None;
    let mut cur = *head;

    while let Some(c) = cur {
        if sched.tasks[c].deadline < sched.tasks[best].deadline {
            best = c;
            best_prev = prev;
        }
        prev = Some(c);
        cur = sched.tasks[c].next;
    }

    if let Some(bp) = best_prev {
        sched.tasks[bp].next = sched.tasks[best].next;
    } else {
        *head = sched.tasks[best].next;
    }
    sched.tasks[best].next = None;
    Some(best)
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// Counting semaphore with an inclusive `max_count`. Waiters queue strict
/// FIFO — a semaphore models resource availability, not priority (§4.7).
pub struct Semaphore {
    count: u32,
    max_count: u32,
    wait_head: Option<usize>,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            count: 0,
            max_count: u32::MAX,
            wait_head: None,
        }
    }

    pub fn init(&mut self, initial_count: u32, max_count: u32) -> OsResult<()> {
        if max_count == 0 {
            return Err(OsError::Invalid);
        }
        self.count = initial_count.min(max_count);
        self.max_count = max_count;
        self.wait_head = None;
        Ok(())
    }

    fn wait_with(&mut self, sched: &mut Scheduler) {
        if self.count > 0 {
            self.count -= 1;
            return;
        }
        let tick = sched.tick;
        let cur = sched.current_task;
        sched.tasks[cur].state = TaskState::Waiting;
        enqueue(sched, &mut self.wait_head, cur);
        sched.schedule(tick);
    }

    /// Block until a unit is available. Returns once posted to — the
    /// caller does not need to re-check `count`.
    pub fn wait(&mut self) {
        with_scheduler(|sched| self.wait_with(sched));
    }

    fn try_wait_with(&mut self) -> OsResult<()> {
        if self.count > 0 {
            self.count -= 1;
            Ok(())
        } else {
            Err(OsError::Timeout)
        }
    }

    pub fn try_wait(&mut self) -> OsResult<()> {
        with_scheduler(|_| self.try_wait_with())
    }

    /// Poll `try_wait` and yield until acquired or `timeout_ticks` have
    /// elapsed (§4.7, §9: polling timeouts are a deliberate simplicity
    /// choice, not an oversight).
    pub fn wait_timeout(&mut self, timeout_ticks: u32) -> OsResult<()> {
        let start = with_scheduler(|s| s.tick);
        loop {
            if self.try_wait().is_ok() {
                return Ok(());
            }
            let now = with_scheduler(|s| s.tick);
            if now.wrapping_sub(start) >= timeout_ticks {
                return Err(OsError::Timeout);
            }
            kernel::yield_task();
        }
    }

    fn post_with(&mut self, sched: &mut Scheduler) {
        if let Some(woken) = dequeue_front(sched, &mut self.wait_head) {
            sched.tasks[woken].state = TaskState::Ready;
            let tick = sched.tick;
            sched.schedule(tick);
        } else if self.count < self.max_count {
            self.count += 1;
        }
    }

    /// Wake the longest-waiting task if any, otherwise increment `count`
    /// (saturating at `max_count`).
    pub fn post(&mut self) {
        with_scheduler(|sched| self.post_with(sched));
    }

    pub fn get_count(&self) -> u32 {
        self.count
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Recursive mutex with single-hop deadline donation (§4.8). Waiters
/// queue by deadline (EDF), not FIFO — unlike the semaphore, a mutex
/// waiter's urgency is exactly what justifies letting it cut the line.
pub struct Mutex {
    locked: bool,
    owner: Option<usize>,
    depth: u32,
    original_deadline: u32,
    wait_head: Option<usize>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: false,
            owner: None,
            depth: 0,
            original_deadline: DEADLINE_NONE,
            wait_head: None,
        }
    }

    pub fn init(&mut self) {
        self.locked = false;
        self.owner = None;
        self.depth = 0;
        self.original_deadline = DEADLINE_NONE;
        self.wait_head = None;
    }

    fn lock_with(&mut self, sched: &mut Scheduler) {
        let cur = sched.current_task;

        if !self.locked {
            self.locked = true;
            self.owner = Some(cur);
            self.depth = 1;
            self.original_deadline = sched.tasks[cur].deadline;
            return;
        }

        if self.owner == Some(cur) {
            self.depth += 1;
            return;
        }

        let owner = self.owner.expect("locked mutex always has an owner");
        if sched.tasks[cur].deadline < sched.tasks[owner].deadline {
            sched.tasks[owner].deadline = sched.tasks[cur].deadline;
        }

        let tick = sched.tick;
        sched.tasks[cur].state = TaskState::Waiting;
        enqueue(sched, &mut self.wait_head, cur);
        sched.schedule(tick);
    }

    /// Acquire the lock, blocking (with deadline donation to the current
    /// owner) until it becomes available.
    pub fn lock(&mut self) {
        with_scheduler(|sched| self.lock_with(sched));
    }

    fn try_lock_with(&mut self, sched: &mut Scheduler) -> OsResult<()> {
        let cur = sched.current_task;
        if !self.locked {
            self.locked = true;
            self.owner = Some(cur);
            self.depth = 1;
            self.original_deadline = sched.tasks[cur].deadline;
            return Ok(());
        }
        if self.owner == Some(cur) {
            self.depth += 1;
            return Ok(());
        }
        Err(OsError::Timeout)
    }

    pub fn try_lock(&mut self) -> OsResult<()> {
        with_scheduler(|sched| self.try_lock_with(sched))
    }

    pub fn lock_timeout(&mut self, timeout_ticks: u32) -> OsResult<()> {
        let start = with_scheduler(|s| s.tick);
        loop {
            if self.try_lock().is_ok() {
                return Ok(());
            }
            let now = with_scheduler(|s| s.tick);
            if now.wrapping_sub(start) >= timeout_ticks {
                return Err(OsError::Timeout);
            }
            kernel::yield_task();
        }
    }

    fn unlock_with(&mut self, sched: &mut Scheduler) -> OsResult<()> {
        let cur = sched.current_task;
        if self.owner != Some(cur) {
            return Err(OsError::NotOwner);
        }

        self.depth -= 1;
        if self.depth > 0 {
            return Ok(());
        }

        sched.tasks[cur].deadline = self.original_deadline;

        if let Some(best) = dequeue_min_deadline(sched, &mut self.wait_head) {
            sched.tasks[best].state = TaskState::Ready;
            self.owner = Some(best);
            self.depth = 1;
            self.original_deadline = sched.tasks[best].deadline;
            let tick = sched.tick;
            sched.schedule(tick);
        } else {
            self.locked = false;
            self.owner = None;
        }

        Ok(())
    }

    /// Release one level of recursion. On the final `unlock`, restores
    /// the owner's original deadline and hands ownership to the
    /// minimum-deadline waiter, if any.
    pub fn unlock(&mut self) -> OsResult<()> {
        with_scheduler(|sched| self.unlock_with(sched))
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    extern "C" fn noop_entry(_p: *mut ()) -> ! {
        loop {}
    }

    /// A local scheduler with the idle task plus `n` plain tasks, none of
    /// them periodic (sync primitives don't care about release timing).
    fn with_tasks(n: usize) -> (Scheduler, Vec<usize>) {
        let mut sched = Scheduler::new();
        sched
            .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
            .unwrap(); // idle
        let ids = (0..n)
            .map(|_| {
                sched
                    .create_task(noop_entry, core::ptr::null_mut(), stack(256), 0, 0)
                    .unwrap()
            })
            .collect();
        (sched, ids)
    }

    #[test]
    fn sem_wait_on_positive_count_does_not_block() {
        let (mut sched, ids) = with_tasks(1);
        let mut sem = Semaphore::new();
        sem.init(1, 1).unwrap();
        sched.current_task = ids[0];
        sem.wait_with(&mut sched);
        assert_eq!(sem.get_count(), 0);
        assert_ne!(sched.tasks[ids[0]].state, TaskState::Waiting);
    }

    #[test]
    fn sem_post_with_no_waiters_increments_count_saturating() {
        let (mut sched, _ids) = with_tasks(1);
        let mut sem = Semaphore::new();
        sem.init(0, 2).unwrap();
        sem.post_with(&mut sched);
        sem.post_with(&mut sched);
        sem.post_with(&mut sched);
        assert_eq!(sem.get_count(), 2);
    }

    #[test]
    fn sem_post_wakes_in_fifo_order() {
        let (mut sched, ids) = with_tasks(2);
        let mut sem = Semaphore::new();
        sem.init(0, 1).unwrap();

        sched.current_task = ids[0];
        sem.wait_with(&mut sched);
        sched.current_task = ids[1];
        sem.wait_with(&mut sched);
        assert_eq!(sched.tasks[ids[0]].state, TaskState::Waiting);
        assert_eq!(sched.tasks[ids[1]].state, TaskState::Waiting);

        // Waking a task marks it Ready and invokes the scheduler; if it
        // also happens to be selected as the new best task, `schedule`
        // promotes it straight to Running — either way it is no longer
        // Waiting, which is what `post` actually promises.
        sem.post_with(&mut sched);
        assert!(sched.tasks[ids[0]].is_runnable());
        assert_eq!(sched.tasks[ids[1]].state, TaskState::Waiting);

        sem.post_with(&mut sched);
        assert!(sched.tasks[ids[1]].is_runnable());
    }

    #[test]
    fn mutex_is_recursive_for_the_same_owner() {
        let (mut sched, ids) = with_tasks(1);
        let mut m = Mutex::new();
        m.init();
        sched.current_task = ids[0];
        m.lock_with(&mut sched);
        m.lock_with(&mut sched);
        assert_eq!(m.depth, 2);
        m.unlock_with(&mut sched).unwrap();
        assert!(m.is_locked());
        m.unlock_with(&mut sched).unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn mutex_unlock_by_non_owner_is_rejected() {
        let (mut sched, ids) = with_tasks(2);
        let mut m = Mutex::new();
        m.init();
        sched.current_task = ids[0];
        m.lock_with(&mut sched);
        sched.current_task = ids[1];
        assert_eq!(m.unlock_with(&mut sched), Err(OsError::NotOwner));
    }

    #[test]
    fn mutex_donates_deadline_to_a_higher_priority_waiter() {
        let (mut sched, ids) = with_tasks(2);
        let low = ids[0];
        let high = ids[1];
        sched.tasks[low].deadline = 1000;
        sched.tasks[high].deadline = 100;

        let mut m = Mutex::new();
        m.init();
        sched.current_task = low;
        m.lock_with(&mut sched);
        assert_eq!(sched.tasks[low].deadline, 1000);

        sched.current_task = high;
        m.lock_with(&mut sched); // blocks: donates
        assert_eq!(sched.tasks[low].deadline, 100);
        assert_eq!(sched.tasks[high].state, TaskState::Waiting);

        sched.current_task = low;
        m.unlock_with(&mut sched).unwrap();
        assert_eq!(sched.tasks[low].deadline, 1000);
        assert_eq!(m.owner, Some(high));
        // `unlock` marks the new owner Ready and invokes the scheduler;
        // since it is now the sole minimum-deadline candidate, `schedule`
        // immediately promotes it to Running.
        assert!(sched.tasks[high].is_runnable());
    }

    #[test]
    fn mutex_unlock_wakes_the_minimum_deadline_waiter_not_fifo() {
        let (mut sched, ids) = with_tasks(3);
        let owner = ids[0];
        let earlier_waiter = ids[1];
        let urgent_waiter = ids[2];
        sched.tasks[owner].deadline = 500;
        sched.tasks[earlier_waiter].deadline = 400;
        sched.tasks[urgent_waiter].deadline = 50;

        let mut m = Mutex::new();
        m.init();
        sched.current_task = owner;
        m.lock_with(&mut sched);

        sched.current_task = earlier_waiter;
        m.lock_with(&mut sched);
        sched.current_task = urgent_waiter;
        m.lock_with(&mut sched);

        sched.current_task = owner;
        m.unlock_with(&mut sched).unwrap();
        assert_eq!(m.owner, Some(urgent_waiter));
        assert_eq!(sched.tasks[earlier_waiter].state, TaskState::Waiting);
    }
}
