//! # Simulated Bus
//!
//! ## Purpose
//!
//! `SimHal` is an in-process model of the FPGA memory window and its I/O
//! interrupt line. It implements the same [`BusHal`] contract as the
//! hardware backend, so the emulation core runs unchanged on a desktop.
//!
//! ## Philosophy
//!
//! This is not a 'mock' that records calls. Memory is owned by the
//! simulated hardware and may change under the caller through
//! [`SimHal::hardware_write`]; interrupts are raised, acknowledged and
//! delivered through the same binding slot the hardware backend uses.
//!
//! ## Determinism
//!
//! Interrupts are delivered only when the test calls
//! [`SimHal::service_interrupts`] (or [`SimIoLine::service`] from another
//! thread), and faults come from a fixed [`FaultPlan`].

pub mod fault_injection;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use hal::{
    BindingSlot, BusHal, ConfigError, HalConfig, InterruptContext, InterruptHandler, IrqLine,
    MemoryError, MemoryWindow, SetupError, Word, WordAddress,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

pub use fault_injection::{BusFault, FaultPlan, SetupFault};

/// Counters describing simulated bus activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Transactions that completed
    pub transactions: u64,
    /// Transactions failed by the fault plan
    pub failed_transactions: u64,
    /// Interrupts that reached a registered handler
    pub delivered: u64,
    /// Interrupts acknowledged with no handler registered
    pub dropped: u64,
}

/// Interrupt line state shared with whoever raises interrupts
#[derive(Debug)]
struct LineState {
    line: IrqLine,
    slot: BindingSlot,
    enabled: AtomicBool,
    pending: AtomicBool,
    events: AtomicU32,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the simulated I/O interrupt line
///
/// Cloneable and `Send`, so a test can raise and service interrupts from a
/// thread that plays the interrupt domain while the owner of the `SimHal`
/// keeps calling the contract.
#[derive(Debug, Clone)]
pub struct SimIoLine {
    state: Arc<LineState>,
}

impl SimIoLine {
    fn new(line: IrqLine) -> Self {
        Self {
            state: Arc::new(LineState {
                line,
                slot: BindingSlot::new(),
                enabled: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                events: AtomicU32::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// The interrupt id of the line
    pub fn line(&self) -> IrqLine {
        self.state.line
    }

    /// Asserts the line, as the FPGA does when a device needs service
    pub fn raise(&self) {
        self.state.pending.store(true, Ordering::SeqCst);
    }

    /// Returns whether the line is asserted and not yet acknowledged
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Delivers a pending interrupt
    ///
    /// Acknowledges first, then invokes the current binding. Returns whether
    /// an interrupt was taken. A masked line (before `setup()`) stays
    /// pending.
    pub fn service(&self) -> bool {
        let state = &self.state;
        if !state.enabled.load(Ordering::SeqCst) {
            return false;
        }
        if !state.pending.swap(false, Ordering::SeqCst) {
            return false;
        }

        let count = state.events.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let ctx = InterruptContext::new(state.line, count);
        if state.slot.dispatch(&ctx) {
            state.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            state.dropped.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Raises the line and services it immediately
    pub fn fire(&self) -> bool {
        self.raise();
        self.service()
    }
}

/// Hardware-side handle to the simulated memory
///
/// Cloneable and `Send`, so a test thread can play the FPGA writing words
/// while the emulation core polls them through `peek_mem`. Accesses through
/// this handle are not bus transactions: they are neither counted nor
/// subject to faults.
#[derive(Debug, Clone)]
pub struct SimMemory {
    window: MemoryWindow,
    words: Arc<Mutex<Vec<Word>>>,
}

impl SimMemory {
    fn new(window: MemoryWindow) -> Self {
        Self {
            window,
            words: Arc::new(Mutex::new(vec![0; window.words() as usize])),
        }
    }

    /// Writes the word at `addr`
    pub fn write(&self, addr: WordAddress, value: Word) -> Result<(), MemoryError> {
        let index = self.window.check(addr)?;
        self.words.lock()[index] = value;
        Ok(())
    }

    /// Reads the word at `addr`
    pub fn read(&self, addr: WordAddress) -> Result<Word, MemoryError> {
        let index = self.window.check(addr)?;
        Ok(self.words.lock()[index])
    }
}

/// Simulated HAL backend
pub struct SimHal {
    window: MemoryWindow,
    memory: SimMemory,
    io: SimIoLine,
    faults: FaultPlan,
    initialized: bool,
    transactions: u64,
    failed_transactions: u64,
}

impl SimHal {
    /// Creates a backend with a zeroed memory of `window` words
    pub fn new(window: MemoryWindow) -> Self {
        Self::with_line(window, IrqLine::ZYNQ_PL_IO)
    }

    /// Creates a backend with the window and interrupt line of `config`
    pub fn from_config(config: &HalConfig) -> Result<Self, ConfigError> {
        let window = config.validate()?;
        Ok(Self::with_line(window, config.io_line()))
    }

    fn with_line(window: MemoryWindow, line: IrqLine) -> Self {
        Self {
            window,
            memory: SimMemory::new(window),
            io: SimIoLine::new(line),
            faults: FaultPlan::default(),
            initialized: false,
            transactions: 0,
            failed_transactions: 0,
        }
    }

    /// Installs a fault plan
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.faults = plan;
        self
    }

    /// Returns whether `setup()` has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Handle to the I/O interrupt line
    pub fn io_line(&self) -> SimIoLine {
        self.io.clone()
    }

    /// Handle to the memory as the hardware sees it
    pub fn memory(&self) -> SimMemory {
        self.memory.clone()
    }

    /// Writes memory from the hardware side
    ///
    /// Not a bus transaction: it is neither counted nor subject to faults.
    pub fn hardware_write(&self, addr: WordAddress, value: Word) -> Result<(), MemoryError> {
        self.memory.write(addr, value)
    }

    /// Reads memory from the hardware side
    pub fn hardware_read(&self, addr: WordAddress) -> Result<Word, MemoryError> {
        self.memory.read(addr)
    }

    /// Asserts the I/O interrupt line
    pub fn raise_io_interrupt(&self) {
        self.io.raise();
    }

    /// Delivers a pending I/O interrupt, returning whether one was taken
    pub fn service_interrupts(&self) -> bool {
        self.io.service()
    }

    /// Raises and services the I/O interrupt
    pub fn fire_io_interrupt(&self) -> bool {
        self.io.fire()
    }

    /// Returns whether the I/O interrupt is pending
    pub fn io_interrupt_pending(&self) -> bool {
        self.io.is_pending()
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> SimStats {
        SimStats {
            transactions: self.transactions,
            failed_transactions: self.failed_transactions,
            delivered: self.io.state.delivered.load(Ordering::Relaxed),
            dropped: self.io.state.dropped.load(Ordering::Relaxed),
        }
    }

    /// Validates and starts one bus transaction
    fn begin(&mut self, addr: WordAddress) -> Result<usize, MemoryError> {
        self.io.state.slot.try_reclaim();
        let index = self.window.check(addr)?;
        if !self.initialized {
            return Err(MemoryError::NotInitialized);
        }
        if self.faults.fails(addr, self.transactions) {
            self.failed_transactions += 1;
            warn!(addr, "injected bus fault");
            return Err(MemoryError::TransactionFailed { addr });
        }
        self.transactions += 1;
        Ok(index)
    }
}

impl BusHal for SimHal {
    fn setup(&mut self) -> Result<(), SetupError> {
        if self.initialized {
            return Err(SetupError::AlreadyInitialized);
        }
        if let Some(fault) = self.faults.setup_fault() {
            warn!(?fault, "injected setup fault");
            return Err(fault.to_error());
        }

        self.io.state.enabled.store(true, Ordering::SeqCst);
        self.initialized = true;
        info!(
            words = self.window.words(),
            line = self.io.line().id(),
            "simulated link ready"
        );
        Ok(())
    }

    fn register_io_interrupt_handler(&self, handler: InterruptHandler) {
        self.io.state.slot.publish(handler);
        debug!(line = self.io.line().id(), "I/O interrupt handler registered");
    }

    fn poke_mem(&mut self, addr: WordAddress, value: Word) -> Result<(), MemoryError> {
        let index = self.begin(addr)?;
        self.memory.words.lock()[index] = value;
        trace!(addr, value, "poke");
        Ok(())
    }

    fn peek_mem(&mut self, addr: WordAddress) -> Result<Word, MemoryError> {
        let index = self.begin(addr)?;
        let value = self.memory.words.lock()[index];
        trace!(addr, value, "peek");
        Ok(value)
    }

    fn window(&self) -> MemoryWindow {
        self.window
    }
}

impl Drop for SimHal {
    fn drop(&mut self) {
        self.io.state.enabled.store(false, Ordering::SeqCst);
        self.io.state.slot.clear();
    }
}
