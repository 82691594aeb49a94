//! # edfos Example Firmware
//!
//! Demonstrates the scenarios from the task's testable-properties list:
//! EDF ordering between two periodic tasks, a shared mutex with deadline
//! inheritance, a paced memory pool, a message queue with a deliberately
//! overrun producer, and a periodic software timer.
//!
//! | Task | Period | Deadline | Role |
//! |------|--------|----------|------|
//! | `sensor_task`    | 4 ticks  | 4 ticks  | fast periodic producer, EDF-favored |
//! | `control_task`   | 10 ticks | 10 ticks | slower periodic consumer |
//! | `logger_task`    | aperiodic | — | drains the message queue, holds the mutex briefly |
//! | `watchdog_task`  | aperiodic | — | locks the same mutex at a tighter deadline, demonstrating inheritance |

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use edfos::config::STACK_SIZE;
use edfos::kernel;
use edfos::mempool::MemPool;
use edfos::msgqueue::{Message, MessageQueue};
use edfos::sync::Mutex;
use edfos::timer::{self, TimerKind};

static mut SENSOR_STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
static mut CONTROL_STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
static mut LOGGER_STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
static mut WATCHDOG_STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];

static mut READING_QUEUE: MessageQueue = MessageQueue::new();
static mut READING_STORAGE: [Message; 4] = [Message {
    kind: 0,
    data: 0,
    ptr: core::ptr::null_mut(),
}; 4];

static mut SAMPLE_POOL: MemPool = MemPool::new();
static mut SAMPLE_STORAGE: [u8; 256] = [0; 256];

static mut SHARED_BUS: Mutex = Mutex::new();

extern "C" fn blink_tick(_arg: *mut ()) {
    // Periodic housekeeping callback; real firmware would toggle a GPIO.
}

/// Fast periodic producer: every period, pulls a block from the sample
/// pool, pretends to fill it with a reading, and pushes a notification
/// onto the queue. Released every 4 ticks with an equal-length deadline —
/// the highest-urgency periodic task in this demo, so EDF always prefers
/// it over `control_task` when both are pending.
extern "C" fn sensor_task(_parameter: *mut ()) -> ! {
    loop {
        let pool = unsafe { &mut *core::ptr::addr_of_mut!(SAMPLE_POOL) };
        if let Ok(block) = pool.alloc_try() {
            let queue = unsafe { &mut *core::ptr::addr_of_mut!(READING_QUEUE) };
            let _ = queue.send(Message {
                kind: 1,
                data: block as usize as u32,
                ptr: block as *mut (),
            });
        }
        kernel::yield_task();
    }
}

/// Slower periodic consumer: drains one reading per period and frees its
/// block back to the pool. Released every 10 ticks — EDF runs it whenever
/// `sensor_task` is not simultaneously pending.
extern "C" fn control_task(_parameter: *mut ()) -> ! {
    loop {
        let queue = unsafe { &mut *core::ptr::addr_of_mut!(READING_QUEUE) };
        if let Ok(msg) = queue.receive() {
            let pool = unsafe { &mut *core::ptr::addr_of_mut!(SAMPLE_POOL) };
            let _ = pool.free_try(msg.ptr as *mut u8);
        }
        kernel::yield_task();
    }
}

/// Aperiodic: holds `SHARED_BUS` for a short stretch of busy work, then
/// yields. A lower-urgency task whose deadline `watchdog_task` can
/// temporarily donate past while waiting on the same mutex.
extern "C" fn logger_task(_parameter: *mut ()) -> ! {
    let mutex = core::ptr::addr_of_mut!(SHARED_BUS);
    loop {
        unsafe { (*mutex).lock() };
        let mut busy: u32 = 0;
        for _ in 0..64 {
            busy = busy.wrapping_add(1);
        }
        unsafe {
            (*mutex).unlock().ok();
        }
        kernel::yield_task();
    }
}

/// Aperiodic, higher urgency than `logger_task`: contends for the same
/// mutex, demonstrating single-hop deadline inheritance (§4.8) whenever
/// it arrives while `logger_task` already holds the lock.
extern "C" fn watchdog_task(_parameter: *mut ()) -> ! {
    let mutex = core::ptr::addr_of_mut!(SHARED_BUS);
    loop {
        unsafe { (*mutex).lock() };
        unsafe {
            (*mutex).unlock().ok();
        }
        kernel::yield_task();
    }
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init();

    unsafe {
        (*core::ptr::addr_of_mut!(READING_QUEUE))
            .init(&mut *core::ptr::addr_of_mut!(READING_STORAGE))
            .expect("queue init");
        (*core::ptr::addr_of_mut!(SAMPLE_POOL))
            .init(&mut *core::ptr::addr_of_mut!(SAMPLE_STORAGE), 16, 8, 4)
            .expect("pool init");
    }

    let heartbeat = timer::create(TimerKind::Periodic, 100, blink_tick, core::ptr::null_mut())
        .expect("timer create");
    timer::start(heartbeat).expect("timer start");

    kernel::create_task(
        sensor_task,
        core::ptr::null_mut(),
        unsafe { &mut *core::ptr::addr_of_mut!(SENSOR_STACK) },
        4,
        4,
    )
    .expect("create sensor_task");

    kernel::create_task(
        control_task,
        core::ptr::null_mut(),
        unsafe { &mut *core::ptr::addr_of_mut!(CONTROL_STACK) },
        10,
        10,
    )
    .expect("create control_task");

    kernel::create_task(
        logger_task,
        core::ptr::null_mut(),
        unsafe { &mut *core::ptr::addr_of_mut!(LOGGER_STACK) },
        0,
        0,
    )
    .expect("create logger_task");

    kernel::create_task(
        watchdog_task,
        core::ptr::null_mut(),
        unsafe { &mut *core::ptr::addr_of_mut!(WATCHDOG_STACK) },
        0,
        0,
    )
    .expect("create watchdog_task");

    kernel::start(cp)
}
