//! I/O interrupt binding
//!
//! Hardware raises the I/O interrupt on its own schedule, in an execution
//! context that must not block, allocate, or take locks. The only state
//! shared with that context is the currently registered handler, which
//! lives in a [`BindingSlot`].
//!
//! ## Publishing
//!
//! `BindingSlot::publish` installs a new handler with a single atomic
//! pointer exchange. The interrupt side announces itself through a reader
//! counter before loading the pointer, so a superseded handler is only
//! freed once no dispatch can still be running it. Superseded handlers
//! that are still in use are parked on a retired list and reclaimed by a
//! later publish, `clear`, `reclaim`, or when the slot is dropped.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A hardware interrupt line at the platform interrupt controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrqLine(pub u32);

impl IrqLine {
    /// First PL-to-PS shared peripheral interrupt on Zynq-7000 (IRQ_F2P[0])
    pub const ZYNQ_PL_IO: IrqLine = IrqLine(61);

    /// Returns the raw interrupt id
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IRQ {}", self.0)
    }
}

/// Hardware-provided context for one interrupt delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptContext {
    /// Line that fired
    pub line: IrqLine,
    /// Cumulative delivery count reported by the controller
    pub event_count: u32,
}

impl InterruptContext {
    pub const fn new(line: IrqLine, event_count: u32) -> Self {
        Self { line, event_count }
    }
}

type HandlerFn = dyn Fn(&InterruptContext) + Send + Sync + 'static;

/// Callback invoked when the I/O interrupt fires
///
/// Any state the callback needs travels with it, either captured by the
/// closure or passed explicitly through [`InterruptHandler::with_context`].
pub struct InterruptHandler {
    func: Box<HandlerFn>,
}

impl InterruptHandler {
    /// Wraps a closure as an interrupt handler
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&InterruptContext) + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// Binds a plain function to an owned context value
    ///
    /// ```
    /// use hal::{InterruptContext, InterruptHandler, IrqLine};
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use std::sync::Arc;
    ///
    /// fn on_io(count: &Arc<AtomicU32>, _ctx: &InterruptContext) {
    ///     count.fetch_add(1, Ordering::SeqCst);
    /// }
    ///
    /// let count = Arc::new(AtomicU32::new(0));
    /// let handler = InterruptHandler::with_context(count.clone(), on_io);
    /// handler.invoke(&InterruptContext::new(IrqLine::ZYNQ_PL_IO, 1));
    /// assert_eq!(count.load(Ordering::SeqCst), 1);
    /// ```
    pub fn with_context<T>(context: T, func: fn(&T, &InterruptContext)) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(move |ctx| func(&context, ctx))
    }

    /// Runs the handler
    pub fn invoke(&self, ctx: &InterruptContext) {
        (self.func)(ctx)
    }
}

impl fmt::Debug for InterruptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandler").finish_non_exhaustive()
    }
}

/// Holds zero or one interrupt handler, shared between the caller domain
/// and the interrupt domain
///
/// A handler replaced while a dispatch is running is kept on a retired
/// list and freed by the next caller-domain call to `publish`, `clear`,
/// `reclaim` or `try_reclaim`. Backends call `try_reclaim` on every bus
/// transaction, so a retired handler lives at most until the next access.
pub struct BindingSlot {
    current: AtomicPtr<InterruptHandler>,
    readers: AtomicUsize,
    retired: Mutex<Vec<Box<InterruptHandler>>>,
    retired_count: AtomicUsize,
}

impl BindingSlot {
    /// Creates an empty slot
    pub fn new() -> Self {
        Self {
            current: AtomicPtr::new(ptr::null_mut()),
            readers: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
            retired_count: AtomicUsize::new(0),
        }
    }

    /// Installs `handler`, replacing any previous binding
    ///
    /// Does not wait for interrupts in flight: a dispatch that already
    /// loaded the previous handler finishes running it, every dispatch
    /// that starts afterwards sees `handler`.
    pub fn publish(&self, handler: InterruptHandler) {
        let new = Box::into_raw(Box::new(handler));
        self.replace(new);
    }

    /// Removes the current binding, if any
    pub fn clear(&self) {
        self.replace(ptr::null_mut());
    }

    /// Returns whether a handler is currently bound
    pub fn is_bound(&self) -> bool {
        !self.current.load(Ordering::SeqCst).is_null()
    }

    /// Invokes the current binding with `ctx`
    ///
    /// Safe to call from interrupt context: it neither allocates nor
    /// locks. Returns `false` when no handler is bound.
    pub fn dispatch(&self, ctx: &InterruptContext) -> bool {
        self.readers.fetch_add(1, Ordering::SeqCst);
        let handler = self.current.load(Ordering::SeqCst);

        // SAFETY: a non-null pointer came from `Box::into_raw` in `publish`.
        // While `readers` is non-zero neither `reclaim_locked` nor `drop`
        // frees it, and the reader count was raised before the load.
        let invoked = match unsafe { handler.as_ref() } {
            Some(handler) => {
                handler.invoke(ctx);
                true
            }
            None => false,
        };

        self.readers.fetch_sub(1, Ordering::SeqCst);
        invoked
    }

    /// Frees superseded handlers that no dispatch can still be using
    pub fn reclaim(&self) {
        let mut retired = self.retired.lock();
        self.reclaim_locked(&mut retired);
    }

    /// Like [`BindingSlot::reclaim`], but takes no lock when nothing is
    /// retired
    pub fn try_reclaim(&self) {
        if self.retired_count.load(Ordering::SeqCst) != 0 {
            self.reclaim();
        }
    }

    /// Number of superseded handlers awaiting reclamation
    pub fn retired_len(&self) -> usize {
        self.retired_count.load(Ordering::SeqCst)
    }

    fn replace(&self, new: *mut InterruptHandler) {
        let mut retired = self.retired.lock();
        let old = self.current.swap(new, Ordering::SeqCst);
        if !old.is_null() {
            // SAFETY: `old` came from `Box::into_raw` and is no longer
            // reachable through `current`; ownership moves to the list.
            retired.push(unsafe { Box::from_raw(old) });
        }
        self.reclaim_locked(&mut retired);
    }

    fn reclaim_locked(&self, retired: &mut Vec<Box<InterruptHandler>>) {
        // Any dispatch that raises the counter after this load observes the
        // swapped-in pointer, so retired handlers are unreachable.
        if self.readers.load(Ordering::SeqCst) == 0 {
            retired.clear();
        }
        self.retired_count.store(retired.len(), Ordering::SeqCst);
    }
}

impl Default for BindingSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSlot")
            .field("bound", &self.is_bound())
            .field("readers", &self.readers.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for BindingSlot {
    fn drop(&mut self) {
        let current = *self.current.get_mut();
        if !current.is_null() {
            // SAFETY: `&mut self` rules out concurrent dispatch.
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn counting_handler(counter: &Arc<AtomicU32>) -> InterruptHandler {
        let counter = counter.clone();
        InterruptHandler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn ctx(event_count: u32) -> InterruptContext {
        InterruptContext::new(IrqLine::ZYNQ_PL_IO, event_count)
    }

    #[test]
    fn test_empty_slot_drops_interrupt() {
        let slot = BindingSlot::new();
        assert!(!slot.is_bound());
        assert!(!slot.dispatch(&ctx(1)));
    }

    #[test]
    fn test_publish_and_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let slot = BindingSlot::new();
        slot.publish(counting_handler(&calls));

        assert!(slot.is_bound());
        assert!(slot.dispatch(&ctx(1)));
        assert!(slot.dispatch(&ctx(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replacement_silences_old_handler() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let slot = BindingSlot::new();

        slot.publish(counting_handler(&first));
        slot.dispatch(&ctx(1));
        slot.publish(counting_handler(&second));
        slot.dispatch(&ctx(2));
        slot.dispatch(&ctx(3));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(slot.retired_len(), 0);
    }

    #[test]
    fn test_context_is_passed_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = BindingSlot::new();
        let sink = seen.clone();
        slot.publish(InterruptHandler::new(move |ctx| sink.lock().push(*ctx)));

        slot.dispatch(&ctx(7));
        assert_eq!(*seen.lock(), vec![ctx(7)]);
    }

    #[test]
    fn test_clear_unbinds() {
        let calls = Arc::new(AtomicU32::new(0));
        let slot = BindingSlot::new();
        slot.publish(counting_handler(&calls));
        slot.clear();

        assert!(!slot.is_bound());
        assert!(!slot.dispatch(&ctx(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_republish_from_inside_handler_defers_reclaim() {
        // The running handler replaces itself; it must stay alive until the
        // dispatch that is executing it returns.
        let slot = Arc::new(BindingSlot::new());
        let replaced = Arc::new(AtomicU32::new(0));
        let inner_slot = slot.clone();
        let inner_replaced = replaced.clone();
        slot.publish(InterruptHandler::new(move |_| {
            inner_slot.publish(counting_handler(&inner_replaced));
            assert_eq!(inner_slot.retired_len(), 1);
        }));

        assert!(slot.dispatch(&ctx(1)));
        assert_eq!(slot.retired_len(), 1);
        slot.reclaim();
        assert_eq!(slot.retired_len(), 0);

        slot.dispatch(&ctx(2));
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_reclaim_frees_handler_retired_mid_dispatch() {
        let slot = Arc::new(BindingSlot::new());
        let captured = Arc::new(AtomicU32::new(0));
        let inner_slot = slot.clone();
        let retired_state = captured.clone();
        slot.publish(InterruptHandler::new(move |_| {
            retired_state.fetch_add(1, Ordering::SeqCst);
            inner_slot.publish(InterruptHandler::new(|_| {}));
        }));
        assert_eq!(Arc::strong_count(&captured), 2);

        slot.dispatch(&ctx(1));
        assert_eq!(slot.retired_len(), 1);
        assert_eq!(Arc::strong_count(&captured), 2);

        slot.try_reclaim();
        assert_eq!(slot.retired_len(), 0);
        assert_eq!(Arc::strong_count(&captured), 1);

        // Nothing retired: no-op.
        slot.try_reclaim();
        assert!(slot.is_bound());
    }

    #[test]
    fn test_concurrent_publish_and_dispatch() {
        let slot = Arc::new(BindingSlot::new());
        let total = Arc::new(AtomicU32::new(0));

        let dispatcher = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                let mut invoked = 0u32;
                for n in 0..10_000 {
                    if slot.dispatch(&ctx(n)) {
                        invoked += 1;
                    }
                }
                invoked
            })
        };

        for _ in 0..1_000 {
            slot.publish(counting_handler(&total));
        }

        let invoked = dispatcher.join().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), invoked);
        slot.reclaim();
        assert_eq!(slot.retired_len(), 0);
    }

    #[test]
    fn test_with_context_handler() {
        fn bump(counter: &Arc<AtomicU32>, ctx: &InterruptContext) {
            counter.fetch_add(ctx.event_count, Ordering::SeqCst);
        }

        let counter = Arc::new(AtomicU32::new(0));
        let slot = BindingSlot::new();
        slot.publish(InterruptHandler::with_context(counter.clone(), bump));

        slot.dispatch(&ctx(3));
        slot.dispatch(&ctx(4));
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_irq_line_display() {
        assert_eq!(IrqLine::ZYNQ_PL_IO.to_string(), "IRQ 61");
        assert_eq!(IrqLine(33).id(), 33);
    }
}
