//! The HAL contract
//!
//! Emulation code drives FPGA memory through [`BusHal`] and never learns
//! which backend sits underneath. One backend is chosen when the process
//! is composed, either statically or as `Box<dyn BusHal>`.

use crate::interrupts::InterruptHandler;
use crate::memory::{MemoryError, MemoryWindow, Word, WordAddress};
use crate::setup::SetupError;

/// Memory and I/O interrupt access to the FPGA bus
///
/// # Contract
///
/// - `setup` runs exactly once, before any memory access. A second call
///   fails with `SetupError::AlreadyInitialized`.
/// - `register_io_interrupt_handler` may be called at any time, including
///   before `setup`. It replaces the previous handler atomically and
///   returns without waiting for interrupts in flight.
/// - Every `poke_mem`/`peek_mem` is exactly one bus transaction, issued in
///   program order and never served from a cache.
/// - Addresses outside [`BusHal::window`] fail with
///   `MemoryError::AddressOutOfRange`.
pub trait BusHal {
    /// Maps the register window and binds the I/O interrupt line
    fn setup(&mut self) -> Result<(), SetupError>;

    /// Installs `handler` as the I/O interrupt handler
    fn register_io_interrupt_handler(&self, handler: InterruptHandler);

    /// Writes `value` to the hardware word at `addr`
    fn poke_mem(&mut self, addr: WordAddress, value: Word) -> Result<(), MemoryError>;

    /// Reads the hardware word at `addr`
    fn peek_mem(&mut self, addr: WordAddress) -> Result<Word, MemoryError>;

    /// The window of valid word addresses
    fn window(&self) -> MemoryWindow;
}

impl<H: BusHal + ?Sized> BusHal for Box<H> {
    fn setup(&mut self) -> Result<(), SetupError> {
        (**self).setup()
    }

    fn register_io_interrupt_handler(&self, handler: InterruptHandler) {
        (**self).register_io_interrupt_handler(handler)
    }

    fn poke_mem(&mut self, addr: WordAddress, value: Word) -> Result<(), MemoryError> {
        (**self).poke_mem(addr, value)
    }

    fn peek_mem(&mut self, addr: WordAddress) -> Result<Word, MemoryError> {
        (**self).peek_mem(addr)
    }

    fn window(&self) -> MemoryWindow {
        (**self).window()
    }
}
