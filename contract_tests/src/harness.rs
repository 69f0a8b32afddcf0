//! Backends under test
//!
//! A harness owns a backend plus the handles that play the hardware side.

use std::fmt;
use std::sync::Arc;

use hal::{BusHal, HalConfig, IrqLine, MemoryWindow, Word, WordAddress};
use hal_sim::SimHal;
use hal_zynq::{FakeGic, FakeMmio, FakePlatform, ZynqHal};

/// Raises and services the I/O interrupt from any thread
#[derive(Clone)]
pub struct InterruptSource {
    fire: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl InterruptSource {
    pub fn new<F>(fire: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            fire: Arc::new(fire),
        }
    }

    /// Raises the line and delivers it, returning whether it was taken
    pub fn fire(&self) -> bool {
        (self.fire)()
    }
}

impl fmt::Debug for InterruptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptSource").finish_non_exhaustive()
    }
}

/// A backend together with control over its hardware side
pub trait HalHarness {
    type Hal: BusHal;

    /// Short backend name used in assertion messages
    fn name(&self) -> &'static str;

    /// The backend under test
    fn hal(&mut self) -> &mut Self::Hal;

    /// The I/O interrupt line the backend binds
    fn io_line(&self) -> IrqLine;

    /// Asserts the I/O interrupt line
    fn raise_io_interrupt(&self);

    /// Delivers pending interrupts, returning whether one was taken
    fn service_interrupts(&self) -> bool;

    /// Returns whether the I/O interrupt is asserted and unacknowledged
    fn io_interrupt_pending(&self) -> bool;

    /// Writes a memory word from the hardware side
    fn hardware_write(&self, addr: WordAddress, value: Word);

    /// Handle for raising interrupts from another thread
    fn interrupt_source(&self) -> InterruptSource;

    fn fire_io_interrupt(&self) -> bool {
        self.raise_io_interrupt();
        self.service_interrupts()
    }
}

/// Harness over [`SimHal`]
pub struct SimHarness {
    hal: SimHal,
}

impl SimHarness {
    /// Creates an uninitialized simulated backend with `window`
    pub fn new(window: MemoryWindow) -> Self {
        Self {
            hal: SimHal::new(window),
        }
    }
}

impl HalHarness for SimHarness {
    type Hal = SimHal;

    fn name(&self) -> &'static str {
        "sim"
    }

    fn hal(&mut self) -> &mut SimHal {
        &mut self.hal
    }

    fn io_line(&self) -> IrqLine {
        self.hal.io_line().line()
    }

    fn raise_io_interrupt(&self) {
        self.hal.raise_io_interrupt();
    }

    fn service_interrupts(&self) -> bool {
        self.hal.service_interrupts()
    }

    fn io_interrupt_pending(&self) -> bool {
        self.hal.io_interrupt_pending()
    }

    fn hardware_write(&self, addr: WordAddress, value: Word) {
        // Out-of-window writes have no hardware location to land in.
        let _ = self.hal.hardware_write(addr, value);
    }

    fn interrupt_source(&self) -> InterruptSource {
        let line = self.hal.io_line();
        InterruptSource::new(move || line.fire())
    }
}

/// Harness over [`ZynqHal`] with fake registers and interrupt controller
pub struct ZynqHarness {
    hal: ZynqHal<FakePlatform>,
    mmio: FakeMmio,
    gic: FakeGic,
    line: IrqLine,
}

impl ZynqHarness {
    /// Creates an uninitialized Zynq backend with `window`
    pub fn new(window: MemoryWindow) -> Self {
        let config = HalConfig {
            window_words: window.words(),
            ..HalConfig::default()
        };
        let line = config.io_line();
        let mmio = FakeMmio::new(window.byte_len());
        let gic = FakeGic::new();
        let platform = FakePlatform::new(mmio.clone(), gic.clone());
        Self {
            hal: ZynqHal::new(platform, window, line),
            mmio,
            gic,
            line,
        }
    }
}

impl HalHarness for ZynqHarness {
    type Hal = ZynqHal<FakePlatform>;

    fn name(&self) -> &'static str {
        "zynq"
    }

    fn hal(&mut self) -> &mut ZynqHal<FakePlatform> {
        &mut self.hal
    }

    fn io_line(&self) -> IrqLine {
        self.line
    }

    fn raise_io_interrupt(&self) {
        self.gic.raise(self.line);
    }

    fn service_interrupts(&self) -> bool {
        self.gic.service() > 0
    }

    fn io_interrupt_pending(&self) -> bool {
        self.gic.is_pending(self.line)
    }

    fn hardware_write(&self, addr: WordAddress, value: Word) {
        if let Ok(index) = self.hal.window().check(addr) {
            self.mmio
                .hardware_write_u16(MemoryWindow::byte_offset(index), value);
        }
    }

    fn interrupt_source(&self) -> InterruptSource {
        let gic = self.gic.clone();
        let line = self.line;
        InterruptSource::new(move || gic.fire(line) > 0)
    }
}
