//! The contract every backend must honor
//!
//! Each check takes a freshly built harness whose backend has not been
//! set up yet, and panics with the backend name on violation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use hal::{
    BusHal, InterruptContext, InterruptHandler, MemoryError, SetupError, Word, WordAddress,
};
use parking_lot::Mutex;

use crate::harness::HalHarness;

/// Builds a handler that counts its invocations
pub fn counting_handler(calls: &Arc<AtomicU32>) -> InterruptHandler {
    let calls = calls.clone();
    InterruptHandler::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}

/// Contexts seen by a handler, in delivery order
#[derive(Debug, Default)]
pub struct ObservedContexts {
    seen: Mutex<Vec<InterruptContext>>,
}

impl ObservedContexts {
    pub fn record(&self, ctx: &InterruptContext) {
        self.seen.lock().push(*ctx);
    }

    pub fn contexts(&self) -> Vec<InterruptContext> {
        self.seen.lock().clone()
    }
}

fn ready<H: HalHarness>(harness: &mut H) {
    let name = harness.name();
    if let Err(err) = harness.hal().setup() {
        panic!("[{}] setup failed: {}", name, err);
    }
}

/// `setup()` succeeds once and refuses a second call
pub fn setup_is_one_time<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    assert_eq!(
        harness.hal().setup(),
        Err(SetupError::AlreadyInitialized),
        "[{}] second setup",
        harness.name()
    );
}

/// Peek and poke before `setup()` report `NotInitialized`
pub fn access_requires_setup<H: HalHarness>(mut harness: H) {
    let name = harness.name();
    let hal = harness.hal();
    assert_eq!(hal.poke_mem(0, 1), Err(MemoryError::NotInitialized), "[{}]", name);
    assert_eq!(hal.peek_mem(0), Err(MemoryError::NotInitialized), "[{}]", name);
}

/// The window check comes before the setup check: an out-of-window address
/// reports `AddressOutOfRange` even before `setup()`
pub fn window_checked_before_setup<H: HalHarness>(mut harness: H) {
    let name = harness.name();
    let words = harness.hal().window().words();
    let Ok(addr) = WordAddress::try_from(words) else {
        // A full 16-bit window has no out-of-window address.
        return;
    };

    let expected = MemoryError::AddressOutOfRange { addr, words };
    let hal = harness.hal();
    assert_eq!(hal.poke_mem(addr, 1), Err(expected), "[{}] poke", name);
    assert_eq!(hal.peek_mem(addr), Err(expected), "[{}] peek", name);
    assert_eq!(
        hal.peek_mem(0),
        Err(MemoryError::NotInitialized),
        "[{}] in-window",
        name
    );
}

/// `poke(a, v)` immediately followed by `peek(a)` returns `v`
pub fn poke_then_peek<H: HalHarness>(mut harness: H, addr: WordAddress, value: Word) {
    ready(&mut harness);
    let name = harness.name();
    let hal = harness.hal();
    assert_eq!(hal.poke_mem(addr, value), Ok(()), "[{}] poke {:#06x}", name, addr);
    assert_eq!(hal.peek_mem(addr), Ok(value), "[{}] peek {:#06x}", name, addr);
}

/// Addresses outside the window are reported, never clamped or wrapped
pub fn out_of_window_is_reported<H: HalHarness>(mut harness: H, addr: WordAddress, value: Word) {
    ready(&mut harness);
    let name = harness.name();
    let words = harness.hal().window().words();
    if u32::from(addr) < words {
        return;
    }

    let expected = MemoryError::AddressOutOfRange { addr, words };
    let hal = harness.hal();
    assert_eq!(hal.poke_mem(addr, value), Err(expected), "[{}]", name);
    assert_eq!(hal.peek_mem(addr), Err(expected), "[{}]", name);

    // Wrapping would have landed on the low addresses.
    let wrapped = (u32::from(addr) % words) as WordAddress;
    assert_eq!(hal.peek_mem(wrapped), Ok(0), "[{}] wrapped write", name);
}

/// Peeks observe hardware-side writes rather than a cached value
pub fn peek_reads_through<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    let name = harness.name();
    harness.hal().poke_mem(0x0020, 1).unwrap();
    harness.hardware_write(0x0020, 0o7777);
    assert_eq!(harness.hal().peek_mem(0x0020), Ok(0o7777), "[{}]", name);
}

/// `setup()`, `poke(0x0010, 0xABCD)`, `peek(0x0010)` returns `0xABCD`
pub fn concrete_poke_peek<H: HalHarness>(harness: H) {
    poke_then_peek(harness, 0x0010, 0xABCD);
}

/// A registered handler runs exactly once per interrupt with the line's
/// context, and the interrupt is acknowledged
pub fn interrupt_invokes_handler_once<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    let name = harness.name();
    let line = harness.io_line();
    let observed = Arc::new(ObservedContexts::default());
    {
        let observed = observed.clone();
        harness
            .hal()
            .register_io_interrupt_handler(InterruptHandler::new(move |ctx| observed.record(ctx)));
    }

    harness.raise_io_interrupt();
    assert!(harness.io_interrupt_pending(), "[{}] raised", name);
    assert!(harness.service_interrupts(), "[{}] serviced", name);
    assert!(!harness.io_interrupt_pending(), "[{}] acknowledged", name);

    // No re-fire on the next poll.
    assert!(!harness.service_interrupts(), "[{}] re-fire", name);
    assert_eq!(
        observed.contexts(),
        vec![InterruptContext::new(line, 1)],
        "[{}] contexts",
        name
    );
}

/// A handler registered before `setup()` is bound once setup completes
pub fn handler_survives_setup<H: HalHarness>(mut harness: H) {
    let calls = Arc::new(AtomicU32::new(0));
    harness
        .hal()
        .register_io_interrupt_handler(counting_handler(&calls));
    ready(&mut harness);

    harness.fire_io_interrupt();
    assert_eq!(calls.load(Ordering::SeqCst), 1, "[{}]", harness.name());
}

/// After registering `h2` over `h1`, only `h2` runs
pub fn replacement_is_exclusive<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    let name = harness.name();
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));

    harness
        .hal()
        .register_io_interrupt_handler(counting_handler(&first));
    harness.fire_io_interrupt();
    harness
        .hal()
        .register_io_interrupt_handler(counting_handler(&second));
    for _ in 0..3 {
        harness.fire_io_interrupt();
    }

    assert_eq!(first.load(Ordering::SeqCst), 1, "[{}] h1", name);
    assert_eq!(second.load(Ordering::SeqCst), 3, "[{}] h2", name);
}

/// An interrupt with nothing bound is acknowledged and dropped
pub fn unbound_interrupt_is_dropped<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    let name = harness.name();
    assert!(harness.fire_io_interrupt(), "[{}] taken", name);
    assert!(!harness.io_interrupt_pending(), "[{}] pending", name);
}

/// Replacing the handler while another thread delivers interrupts never
/// blocks and never runs the old handler after the swap, bar one delivery
/// already in flight
pub fn replacement_under_load<H: HalHarness>(mut harness: H) {
    ready(&mut harness);
    let name = harness.name();
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));
    harness
        .hal()
        .register_io_interrupt_handler(counting_handler(&first));

    let running = Arc::new(AtomicBool::new(true));
    let source = harness.interrupt_source();
    let irq_thread = {
        let running = running.clone();
        thread::spawn(move || {
            let mut taken = 0u32;
            while running.load(Ordering::SeqCst) {
                taken += source.fire() as u32;
            }
            taken
        })
    };

    while first.load(Ordering::SeqCst) < 50 {
        thread::yield_now();
    }
    harness
        .hal()
        .register_io_interrupt_handler(counting_handler(&second));
    let first_after_swap = first.load(Ordering::SeqCst);

    while second.load(Ordering::SeqCst) < 50 {
        thread::yield_now();
    }
    running.store(false, Ordering::SeqCst);
    let taken = irq_thread.join().unwrap();

    assert!(
        first.load(Ordering::SeqCst) <= first_after_swap + 1,
        "[{}] old handler ran after swap",
        name
    );
    assert_eq!(
        first.load(Ordering::SeqCst) + second.load(Ordering::SeqCst),
        taken,
        "[{}] every taken interrupt reached exactly one handler",
        name
    );
}
