//! Zynq implementation of the HAL contract.

use hal::{
    BusHal, InterruptHandler, IrqLine, MemoryError, MemoryWindow, SetupError, Word, WordAddress,
};
use tracing::{debug, error, info, trace};

use crate::dispatcher::{DispatchStats, IoInterruptDispatcher};
use crate::gic::InterruptController;
use crate::mmio::Mmio;
use crate::platform::Platform;

/// Hardware resources acquired by `setup()`
struct Attached<W, C> {
    window: W,
    controller: C,
}

/// HAL backend for the FPGA on a Zynq SoC
///
/// Generic over the [`Platform`] that supplies the register window and
/// interrupt controller, so the same code drives real hardware through
/// `UioPlatform` and tests through `FakePlatform`.
pub struct ZynqHal<P: Platform> {
    platform: P,
    window: MemoryWindow,
    io_line: IrqLine,
    dispatcher: IoInterruptDispatcher,
    attached: Option<Attached<P::Window, P::Controller>>,
}

impl<P: Platform> ZynqHal<P> {
    /// Creates an uninitialized backend
    pub fn new(platform: P, window: MemoryWindow, io_line: IrqLine) -> Self {
        Self {
            platform,
            window,
            io_line,
            dispatcher: IoInterruptDispatcher::new(),
            attached: None,
        }
    }

    /// Returns whether `setup()` has completed
    pub fn is_initialized(&self) -> bool {
        self.attached.is_some()
    }

    /// The I/O interrupt line this backend binds
    pub fn io_line(&self) -> IrqLine {
        self.io_line
    }

    /// Delivery counters of the I/O interrupt dispatcher
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Routes the I/O line to the dispatcher's trampoline and unmasks it
    fn setup_interrupts(&self, controller: &mut P::Controller) -> Result<(), SetupError> {
        controller.connect(self.io_line, self.dispatcher.trampoline())?;
        if let Err(err) = controller.enable(self.io_line) {
            // Roll back the connection to keep the controller consistent.
            controller.disconnect(self.io_line);
            return Err(err);
        }
        Ok(())
    }

    fn acquire(&mut self) -> Result<Attached<P::Window, P::Controller>, SetupError> {
        let window = self.platform.map_window(self.window)?;
        let mut controller = self.platform.interrupt_controller()?;
        self.setup_interrupts(&mut controller)?;
        Ok(Attached { window, controller })
    }

    /// Returns whether the hardware link was lost after `setup()`
    pub fn link_failed(&self) -> bool {
        self.attached
            .as_ref()
            .is_some_and(|attached| attached.controller.link_failed())
    }

    /// The live hardware link for a transaction at `addr`
    fn link(
        &mut self,
        addr: WordAddress,
    ) -> Result<&mut Attached<P::Window, P::Controller>, MemoryError> {
        self.dispatcher.reclaim();
        let attached = self.attached.as_mut().ok_or(MemoryError::NotInitialized)?;
        if attached.controller.link_failed() {
            return Err(MemoryError::TransactionFailed { addr });
        }
        Ok(attached)
    }
}

impl<P: Platform> BusHal for ZynqHal<P> {
    fn setup(&mut self) -> Result<(), SetupError> {
        if self.attached.is_some() {
            return Err(SetupError::AlreadyInitialized);
        }

        let attached = self.acquire().map_err(|err| {
            error!(%err, "hardware link setup failed");
            err
        })?;

        self.attached = Some(attached);
        info!(
            words = self.window.words(),
            line = self.io_line.id(),
            "hardware link ready"
        );
        Ok(())
    }

    fn register_io_interrupt_handler(&self, handler: InterruptHandler) {
        self.dispatcher.register(handler);
        debug!(line = self.io_line.id(), "I/O interrupt handler registered");
    }

    fn poke_mem(&mut self, addr: WordAddress, value: Word) -> Result<(), MemoryError> {
        let index = self.window.check(addr)?;
        let attached = self.link(addr)?;
        attached
            .window
            .write_u16(MemoryWindow::byte_offset(index), value);
        trace!(addr, value, "poke");
        Ok(())
    }

    fn peek_mem(&mut self, addr: WordAddress) -> Result<Word, MemoryError> {
        let index = self.window.check(addr)?;
        let attached = self.link(addr)?;
        let value = attached.window.read_u16(MemoryWindow::byte_offset(index));
        trace!(addr, value, "peek");
        Ok(value)
    }

    fn window(&self) -> MemoryWindow {
        self.window
    }
}

impl<P: Platform> Drop for ZynqHal<P> {
    fn drop(&mut self) {
        if let Some(mut attached) = self.attached.take() {
            attached.controller.disconnect(self.io_line);
            info!(line = self.io_line.id(), "hardware link released");
        }
        self.dispatcher.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gic::FakeGic;
    use crate::mmio::{FakeMmio, MmioAccess};
    use crate::platform::FakePlatform;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const LINE: IrqLine = IrqLine::ZYNQ_PL_IO;

    struct Rig {
        hal: ZynqHal<FakePlatform>,
        mmio: FakeMmio,
        gic: FakeGic,
    }

    fn rig(words: u32) -> Rig {
        let window = MemoryWindow::new(words).unwrap();
        let mmio = FakeMmio::new(window.byte_len());
        let gic = FakeGic::new();
        let platform = FakePlatform::new(mmio.clone(), gic.clone());
        Rig {
            hal: ZynqHal::new(platform, window, LINE),
            mmio,
            gic,
        }
    }

    fn counter_handler(calls: &Arc<AtomicU32>) -> InterruptHandler {
        let calls = calls.clone();
        InterruptHandler::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_setup_binds_io_line() {
        let mut rig = rig(0x100);
        assert!(!rig.hal.is_initialized());
        rig.hal.setup().unwrap();

        assert!(rig.hal.is_initialized());
        assert!(rig.gic.is_connected(LINE));
        assert!(rig.gic.is_enabled(LINE));
    }

    #[test]
    fn test_setup_twice() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();
        assert_eq!(rig.hal.setup(), Err(SetupError::AlreadyInitialized));
    }

    #[test]
    fn test_setup_fails_without_controller() {
        let window = MemoryWindow::new(0x10).unwrap();
        let platform = FakePlatform::for_window(window).without_controller();
        let mut hal = ZynqHal::new(platform, window, LINE);

        assert!(matches!(
            hal.setup(),
            Err(SetupError::ControllerUnavailable(_))
        ));
        assert!(!hal.is_initialized());
        assert_eq!(hal.peek_mem(0), Err(MemoryError::NotInitialized));
    }

    #[test]
    fn test_setup_fails_without_window() {
        let window = MemoryWindow::new(0x10).unwrap();
        let platform = FakePlatform::for_window(window).without_window();
        let mut hal = ZynqHal::new(platform, window, LINE);
        assert!(matches!(hal.setup(), Err(SetupError::WindowUnavailable(_))));
    }

    #[test]
    fn test_setup_fails_when_line_refused() {
        let window = MemoryWindow::new(0x10).unwrap();
        let platform = FakePlatform::new(FakeMmio::new(0x20), FakeGic::refusing_connect());
        let mut hal = ZynqHal::new(platform, window, LINE);
        assert_eq!(hal.setup(), Err(SetupError::LineBindFailed(LINE)));
    }

    #[test]
    fn test_access_before_setup() {
        let mut rig = rig(0x100);
        assert_eq!(rig.hal.poke_mem(0, 1), Err(MemoryError::NotInitialized));
        assert_eq!(rig.hal.peek_mem(0), Err(MemoryError::NotInitialized));
        assert!(rig.mmio.accesses().is_empty());
    }

    #[test]
    fn test_poke_then_peek() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();

        rig.hal.poke_mem(0x0010, 0xABCD).unwrap();
        assert_eq!(rig.hal.peek_mem(0x0010), Ok(0xABCD));
        assert_eq!(
            rig.mmio.accesses(),
            vec![
                MmioAccess::Write16 {
                    offset: 0x20,
                    value: 0xABCD
                },
                MmioAccess::Read16 {
                    offset: 0x20,
                    value: 0xABCD
                },
            ]
        );
    }

    #[test]
    fn test_every_access_is_a_transaction() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();

        for _ in 0..3 {
            rig.hal.peek_mem(0x0001).unwrap();
        }
        assert_eq!(rig.mmio.accesses().len(), 3);
    }

    #[test]
    fn test_peek_reflects_hardware_state() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();

        assert_eq!(rig.hal.peek_mem(0x0042), Ok(0));
        rig.mmio.hardware_write_u16(0x84, 0o1234);
        assert_eq!(rig.hal.peek_mem(0x0042), Ok(0o1234));
    }

    #[test]
    fn test_out_of_range_is_reported() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();

        let expected = Err(MemoryError::AddressOutOfRange {
            addr: 0x0100,
            words: 0x100,
        });
        assert_eq!(rig.hal.poke_mem(0x0100, 1), expected.map(|_: Word| ()));
        assert_eq!(rig.hal.peek_mem(0x0100), expected);
        assert!(rig.mmio.accesses().is_empty());
    }

    #[test]
    fn test_interrupt_reaches_handler_once_and_is_acknowledged() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        rig.hal.register_io_interrupt_handler(counter_handler(&calls));

        assert_eq!(rig.gic.fire(LINE), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!rig.gic.is_pending(LINE));

        // Nothing pending, so the next poll delivers nothing.
        assert_eq!(rig.gic.service(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.hal.dispatch_stats().delivered, 1);
    }

    #[test]
    fn test_handler_registered_before_setup() {
        let mut rig = rig(0x100);
        let calls = Arc::new(AtomicU32::new(0));
        rig.hal.register_io_interrupt_handler(counter_handler(&calls));
        rig.hal.setup().unwrap();

        rig.gic.fire(LINE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbound_interrupt_is_dropped() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();

        rig.gic.fire(LINE);
        assert!(!rig.gic.is_pending(LINE));
        assert_eq!(rig.hal.dispatch_stats().dropped, 1);
    }

    #[test]
    fn test_replaced_handler_is_never_invoked_again() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        rig.hal.register_io_interrupt_handler(counter_handler(&first));
        rig.gic.fire(LINE);
        rig.hal.register_io_interrupt_handler(counter_handler(&second));
        rig.gic.fire(LINE);
        rig.gic.fire(LINE);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lost_link_fails_transactions() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();
        rig.hal.poke_mem(0x0010, 1).unwrap();
        rig.mmio.clear_accesses();
        assert!(!rig.hal.link_failed());

        rig.gic.fail_link();

        assert!(rig.hal.link_failed());
        assert!(rig.hal.is_initialized());
        assert_eq!(
            rig.hal.poke_mem(0x0010, 2),
            Err(MemoryError::TransactionFailed { addr: 0x0010 })
        );
        assert_eq!(
            rig.hal.peek_mem(0x0010),
            Err(MemoryError::TransactionFailed { addr: 0x0010 })
        );
        assert_eq!(
            rig.hal.peek_mem(0x0100),
            Err(MemoryError::AddressOutOfRange {
                addr: 0x0100,
                words: 0x100
            })
        );
        assert!(rig.mmio.accesses().is_empty());
    }

    #[test]
    fn test_drop_disconnects_line() {
        let mut rig = rig(0x100);
        rig.hal.setup().unwrap();
        let gic = rig.gic.clone();
        drop(rig);

        assert!(!gic.is_connected(LINE));
        assert_eq!(gic.fire(LINE), 0);
    }
}
