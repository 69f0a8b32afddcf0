//! One-time initialization errors

use thiserror::Error;

use crate::interrupts::IrqLine;

/// Errors that can occur while bringing up the hardware link
///
/// None of these are recoverable at the HAL layer. The caller of
/// `setup()` decides whether to abort.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// `setup()` already completed on this backend
    #[error("HAL already initialized")]
    AlreadyInitialized,

    /// The platform interrupt controller could not be acquired
    #[error("Interrupt controller unavailable: {0}")]
    ControllerUnavailable(String),

    /// The register window could not be mapped
    #[error("Register window unavailable: {0}")]
    WindowUnavailable(String),

    /// The controller refused to route the I/O line
    #[error("Failed to bind {0}")]
    LineBindFailed(IrqLine),

    /// The configuration describes an impossible setup
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
