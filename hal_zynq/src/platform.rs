//! Platform facilities consumed by `setup()`.
//!
//! The operating environment provides the register mapping and the
//! interrupt controller. `ZynqHal` asks for both exactly once.

use hal::{MemoryWindow, SetupError};

use crate::gic::{FakeGic, InterruptController};
use crate::mmio::{FakeMmio, Mmio};

/// Source of the register window and interrupt controller
pub trait Platform {
    type Window: Mmio;
    type Controller: InterruptController;

    /// Maps a register window large enough for `window`
    fn map_window(&mut self, window: MemoryWindow) -> Result<Self::Window, SetupError>;

    /// Acquires the platform interrupt controller
    fn interrupt_controller(&mut self) -> Result<Self::Controller, SetupError>;
}

/// Test platform backed by [`FakeMmio`] and [`FakeGic`]
///
/// Either facility can be withheld to exercise setup failures.
#[derive(Debug, Clone)]
pub struct FakePlatform {
    mmio: Option<FakeMmio>,
    gic: Option<FakeGic>,
}

impl FakePlatform {
    /// Creates a platform that hands out `mmio` and `gic`
    pub fn new(mmio: FakeMmio, gic: FakeGic) -> Self {
        Self {
            mmio: Some(mmio),
            gic: Some(gic),
        }
    }

    /// Creates a platform with a zeroed window sized for `window`
    pub fn for_window(window: MemoryWindow) -> Self {
        Self::new(FakeMmio::new(window.byte_len()), FakeGic::new())
    }

    /// Withholds the register window
    pub fn without_window(mut self) -> Self {
        self.mmio = None;
        self
    }

    /// Withholds the interrupt controller
    pub fn without_controller(mut self) -> Self {
        self.gic = None;
        self
    }
}

impl Platform for FakePlatform {
    type Window = FakeMmio;
    type Controller = FakeGic;

    fn map_window(&mut self, window: MemoryWindow) -> Result<FakeMmio, SetupError> {
        let mmio = self
            .mmio
            .clone()
            .ok_or_else(|| SetupError::WindowUnavailable("no window mapped".to_string()))?;
        if mmio.len() < window.byte_len() {
            return Err(SetupError::WindowUnavailable(format!(
                "mapping holds {:#x} bytes, window needs {:#x}",
                mmio.len(),
                window.byte_len()
            )));
        }
        Ok(mmio)
    }

    fn interrupt_controller(&mut self) -> Result<FakeGic, SetupError> {
        self.gic.clone().ok_or_else(|| {
            SetupError::ControllerUnavailable("no interrupt controller".to_string())
        })
    }
}
