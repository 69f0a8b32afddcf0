//! # Zynq Hardware Abstraction Layer
//!
//! This crate implements the HAL contract for the FPGA fabric of a Zynq
//! SoC.
//!
//! ## Structure
//!
//! - [`mmio`]: register accessor over a mapped AXI window
//! - [`gic`]: interrupt controller seam and a simulated controller
//! - [`dispatcher`]: trampoline from the I/O line into the registered handler
//! - [`platform`]: where `setup()` gets its window and controller from
//! - [`zynq`]: the [`ZynqHal`] backend tying these together
//! - `uio`: Linux userspace I/O platform for real hardware
//! - [`io_controller`]: peripheral device registers of the I/O controller

use hal::{HalConfig, SetupError};

pub mod dispatcher;
pub mod gic;
pub mod io_controller;
pub mod mmio;
pub mod platform;
#[cfg(target_os = "linux")]
pub mod uio;
pub mod zynq;

pub use dispatcher::{DispatchStats, IoInterruptDispatcher};
pub use gic::{FakeGic, InterruptController, IrqFrame, IrqTrampoline};
pub use io_controller::{
    DeviceFlags, DeviceRegister, IoController, IoControllerError, IoDeviceConfig,
};
pub use mmio::{FakeMmio, Mmio, MmioAccess, VolatileMmio};
pub use platform::{FakePlatform, Platform};
#[cfg(target_os = "linux")]
pub use uio::{UioInterrupts, UioMapping, UioPlatform};
pub use zynq::ZynqHal;

/// Builds the hardware backend described by `config`
///
/// The returned backend still needs `setup()`.
#[cfg(target_os = "linux")]
pub fn uio_hal(config: HalConfig) -> Result<ZynqHal<UioPlatform>, SetupError> {
    let window = config
        .validate()
        .map_err(|err| SetupError::InvalidConfig(err.to_string()))?;
    let line = config.io_line();
    Ok(ZynqHal::new(UioPlatform::new(config)?, window, line))
}

/// Builds a backend over fake hardware sized by `config`
pub fn fake_hal(
    config: &HalConfig,
) -> Result<(ZynqHal<FakePlatform>, FakeMmio, FakeGic), SetupError> {
    let window = config
        .validate()
        .map_err(|err| SetupError::InvalidConfig(err.to_string()))?;
    let mmio = FakeMmio::new(window.byte_len());
    let gic = FakeGic::new();
    let platform = FakePlatform::new(mmio.clone(), gic.clone());
    Ok((ZynqHal::new(platform, window, config.io_line()), mmio, gic))
}
