//! I/O interrupt dispatcher.
//!
//! Bridges the controller's trampoline into whatever handler is currently
//! published in the binding slot. The trampoline acknowledges first, then
//! invokes the binding; an interrupt with nothing bound is acknowledged and
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hal::{BindingSlot, InterruptHandler};

use crate::gic::{IrqFrame, IrqTrampoline};

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Interrupts that reached a registered handler
    pub delivered: u64,
    /// Interrupts acknowledged with no handler registered
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Shared {
    slot: BindingSlot,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Owns the I/O interrupt binding and builds the trampoline for it
#[derive(Debug, Clone, Default)]
pub struct IoInterruptDispatcher {
    shared: Arc<Shared>,
}

impl IoInterruptDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `handler` as the binding
    pub fn register(&self, handler: InterruptHandler) {
        self.shared.slot.publish(handler);
    }

    /// Removes the binding
    pub fn unregister(&self) {
        self.shared.slot.clear();
    }

    /// Frees replaced handlers no delivery is still running
    pub fn reclaim(&self) {
        self.shared.slot.try_reclaim();
    }

    /// Returns whether a handler is bound
    pub fn is_bound(&self) -> bool {
        self.shared.slot.is_bound()
    }

    /// Snapshot of the delivery counters
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Handles one delivery
    ///
    /// Runs in interrupt context: no allocation, no locks, no logging.
    pub fn on_interrupt(&self, frame: &mut IrqFrame) {
        frame.acknowledge();
        if self.shared.slot.dispatch(frame.context()) {
            self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Builds the trampoline that `setup()` hands to the controller
    pub fn trampoline(&self) -> IrqTrampoline {
        let dispatcher = self.clone();
        Box::new(move |frame: &mut IrqFrame| dispatcher.on_interrupt(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::IrqLine;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_unbound_interrupt_is_acknowledged_and_dropped() {
        let dispatcher = IoInterruptDispatcher::new();
        let mut frame = IrqFrame::new(IrqLine::ZYNQ_PL_IO, 1);

        dispatcher.on_interrupt(&mut frame);
        assert!(frame.is_acknowledged());
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                delivered: 0,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_trampoline_invokes_binding() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let dispatcher = IoInterruptDispatcher::new();
        dispatcher.register(InterruptHandler::new(move |ctx| {
            assert_eq!(ctx.line, IrqLine::ZYNQ_PL_IO);
            counter.fetch_add(ctx.event_count, Ordering::SeqCst);
        }));

        let trampoline = dispatcher.trampoline();
        let mut frame = IrqFrame::new(IrqLine::ZYNQ_PL_IO, 5);
        trampoline(&mut frame);

        assert!(frame.is_acknowledged());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = IoInterruptDispatcher::new();
        dispatcher.register(InterruptHandler::new(|_| {}));
        assert!(dispatcher.is_bound());
        dispatcher.unregister();
        assert!(!dispatcher.is_bound());
    }

    #[test]
    fn test_reclaim_after_handler_replaced_itself() {
        let dispatcher = IoInterruptDispatcher::new();
        let captured = Arc::new(AtomicU32::new(0));
        let state = captured.clone();
        let inner = dispatcher.clone();
        dispatcher.register(InterruptHandler::new(move |_| {
            state.fetch_add(1, Ordering::SeqCst);
            inner.register(InterruptHandler::new(|_| {}));
        }));

        dispatcher.on_interrupt(&mut IrqFrame::new(IrqLine::ZYNQ_PL_IO, 1));
        assert_eq!(Arc::strong_count(&captured), 2);

        dispatcher.reclaim();
        assert_eq!(Arc::strong_count(&captured), 1);
        assert!(dispatcher.is_bound());
    }
}
