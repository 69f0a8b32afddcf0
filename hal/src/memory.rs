//! Memory window abstraction
//!
//! The FPGA exposes emulated core memory as a window of 16-bit words.
//! Nothing here caches or mirrors that storage: a `MemoryWindow` only
//! knows how big the window is and how logical addresses map onto it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single memory word as seen on the bus
pub type Word = u16;

/// Logical word address
pub type WordAddress = u16;

/// Errors that can occur during memory operations
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// Address lies outside the hardware-defined window
    #[error("Address out of range: {addr:#06x} (window holds {words} words)")]
    AddressOutOfRange { addr: WordAddress, words: u32 },

    /// `setup()` has not completed
    #[error("HAL not initialized")]
    NotInitialized,

    /// The bus transaction did not complete; the hardware link is gone
    #[error("Bus transaction failed at {addr:#06x}")]
    TransactionFailed { addr: WordAddress },
}

/// Hardware-defined window of addressable words
///
/// A window holds between 1 and 65536 words, so every `WordAddress`
/// below `words()` is valid and every other one is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryWindow {
    words: u32,
}

impl MemoryWindow {
    /// Eight 4K-word fields, the largest memory a PDP-8 can address
    pub const PDP8_WORDS: u32 = 8 * 4096;

    /// Largest window a 16-bit address can reach
    pub const MAX_WORDS: u32 = 1 << 16;

    /// Width of one word on the bus, in bytes
    pub const WORD_BYTES: usize = 2;

    /// Creates a window of `words` words
    ///
    /// Returns `None` for an empty window or one larger than the
    /// 16-bit address space.
    pub const fn new(words: u32) -> Option<Self> {
        if words == 0 || words > Self::MAX_WORDS {
            None
        } else {
            Some(Self { words })
        }
    }

    /// Window covering the full PDP-8 memory
    pub const fn pdp8() -> Self {
        Self {
            words: Self::PDP8_WORDS,
        }
    }

    /// Number of words in the window
    pub const fn words(&self) -> u32 {
        self.words
    }

    /// Size of the window in bytes
    pub const fn byte_len(&self) -> usize {
        self.words as usize * Self::WORD_BYTES
    }

    /// Returns whether `addr` falls inside the window
    pub const fn contains(&self, addr: WordAddress) -> bool {
        (addr as u32) < self.words
    }

    /// Validates `addr` and returns its word index
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::AddressOutOfRange` instead of clamping or
    /// wrapping the address.
    pub fn check(&self, addr: WordAddress) -> Result<usize, MemoryError> {
        if self.contains(addr) {
            Ok(addr as usize)
        } else {
            Err(MemoryError::AddressOutOfRange {
                addr,
                words: self.words,
            })
        }
    }

    /// Byte offset of the word at `index`
    pub const fn byte_offset(index: usize) -> usize {
        index * Self::WORD_BYTES
    }
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self::pdp8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        assert!(MemoryWindow::new(0).is_none());
        assert!(MemoryWindow::new(MemoryWindow::MAX_WORDS + 1).is_none());

        let full = MemoryWindow::new(MemoryWindow::MAX_WORDS).unwrap();
        assert!(full.contains(0xFFFF));
        assert_eq!(full.byte_len(), 0x20000);
    }

    #[test]
    fn test_window_check_rejects_out_of_range() {
        let window = MemoryWindow::new(0x100).unwrap();
        assert_eq!(window.check(0x00FF), Ok(0xFF));
        assert_eq!(
            window.check(0x0100),
            Err(MemoryError::AddressOutOfRange {
                addr: 0x0100,
                words: 0x100
            })
        );
    }

    #[test]
    fn test_default_window_is_pdp8() {
        let window = MemoryWindow::default();
        assert_eq!(window.words(), 32768);
        assert!(window.contains(0o77777));
        assert!(!window.contains(0o100000));
    }

    #[test]
    fn test_byte_offset() {
        assert_eq!(MemoryWindow::byte_offset(0), 0);
        assert_eq!(MemoryWindow::byte_offset(0x10), 0x20);
    }

    #[test]
    fn test_error_display() {
        let err = MemoryError::AddressOutOfRange {
            addr: 0x8000,
            words: 0x8000,
        };
        assert_eq!(
            err.to_string(),
            "Address out of range: 0x8000 (window holds 32768 words)"
        );
    }
}
