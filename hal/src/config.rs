//! HAL configuration
//!
//! Loaded from JSON. Every field has a default matching the stock SoC
//! image, so an empty object `{}` is a valid configuration.
//!
//! ```
//! use hal::HalConfig;
//!
//! let config = HalConfig::from_json_str(r#"{ "device": "/dev/uio1", "window_words": 4096 }"#)
//!     .unwrap();
//! let window = config.validate().unwrap();
//! assert_eq!(window.words(), 4096);
//! assert_eq!(config.io_irq, 61);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interrupts::IrqLine;
use crate::memory::MemoryWindow;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON for `HalConfig`
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parsed but describes an impossible setup
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Hardware link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// UIO device exposing the FPGA
    pub device: PathBuf,
    /// UIO map index of the memory window
    pub memory_map: u32,
    /// UIO map index of the I/O controller registers, if present
    pub io_map: Option<u32>,
    /// Number of 16-bit words in the memory window
    pub window_words: u32,
    /// Interrupt id of the I/O line
    pub io_irq: u32,
}

impl HalConfig {
    /// Parses a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks the configuration and returns the memory window it describes
    pub fn validate(&self) -> Result<MemoryWindow, ConfigError> {
        if self.io_map == Some(self.memory_map) {
            return Err(ConfigError::Invalid(format!(
                "io_map and memory_map both use map {}",
                self.memory_map
            )));
        }
        MemoryWindow::new(self.window_words).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "window_words must be within 1..={}, got {}",
                MemoryWindow::MAX_WORDS,
                self.window_words
            ))
        })
    }

    /// The I/O interrupt line
    pub fn io_line(&self) -> IrqLine {
        IrqLine(self.io_irq)
    }
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/uio0"),
            memory_map: 0,
            io_map: None,
            window_words: MemoryWindow::PDP8_WORDS,
            io_irq: IrqLine::ZYNQ_PL_IO.id(),
        }
    }
}
