//! Memory-mapped register access
//!
//! This module provides a trait-based abstraction for the AXI register
//! windows the FPGA exposes, allowing for both real hardware access and
//! fake implementations for testing.
//!
//! ## Safety
//!
//! MMIO accesses have side effects on the hardware. Care must be taken to:
//! - Only touch offsets inside the mapped window
//! - Issue every access as its own volatile transaction
//! - Never merge, elide, or reorder accesses
//!
//! The `VolatileMmio` implementation isolates all unsafe code to small,
//! auditable functions.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

/// Register window trait
///
/// Offsets are in bytes from the start of the window.
///
/// ## Implementation Notes
///
/// Implementations must guarantee:
/// - Each call is exactly one bus transaction of the stated width
/// - Transactions complete, in program order, before returning
/// - Reads are never served from a cached value
pub trait Mmio: Send {
    /// Size of the window in bytes
    fn len(&self) -> usize;

    /// Returns whether the window is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a 16-bit register
    fn read_u16(&mut self, offset: usize) -> u16;

    /// Writes a 16-bit register
    fn write_u16(&mut self, offset: usize, value: u16);

    /// Reads a 32-bit register
    fn read_u32(&mut self, offset: usize) -> u32;

    /// Writes a 32-bit register
    fn write_u32(&mut self, offset: usize, value: u32);
}

/// Real hardware register window
///
/// Every access is a `read_volatile`/`write_volatile` through the mapped
/// pointer, so the compiler can neither elide nor reorder transactions.
///
/// ## Safety
///
/// This implementation is only safe when the pointer handed to
/// [`VolatileMmio::new`] stays mapped, device memory for the lifetime of
/// the value.
#[derive(Debug)]
pub struct VolatileMmio {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the window is device memory, not Rust-owned data; ownership of
// the `VolatileMmio` is what serializes access from the caller domain.
unsafe impl Send for VolatileMmio {}

impl VolatileMmio {
    /// Wraps a mapped register window
    ///
    /// # Safety
    ///
    /// `base` must point to `len` bytes of mapped device memory, aligned to
    /// four bytes, that stay mapped while the returned value is alive.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Start of the mapped window
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn register<T>(&self, offset: usize) -> *mut T {
        let width = core::mem::size_of::<T>();
        assert!(
            offset % width == 0 && offset + width <= self.len,
            "MMIO access of {} bytes at offset {:#x} outside window of {:#x} bytes",
            width,
            offset,
            self.len
        );
        // SAFETY: the assertion keeps the pointer inside the window that
        // `new` promised is mapped.
        unsafe { self.base.as_ptr().add(offset).cast::<T>() }
    }
}

impl Mmio for VolatileMmio {
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn read_u16(&mut self, offset: usize) -> u16 {
        // SAFETY: `register` checked bounds and alignment.
        unsafe { self.register::<u16>(offset).read_volatile() }
    }

    #[inline]
    fn write_u16(&mut self, offset: usize, value: u16) {
        // SAFETY: `register` checked bounds and alignment.
        unsafe { self.register::<u16>(offset).write_volatile(value) }
    }

    #[inline]
    fn read_u32(&mut self, offset: usize) -> u32 {
        // SAFETY: `register` checked bounds and alignment.
        unsafe { self.register::<u32>(offset).read_volatile() }
    }

    #[inline]
    fn write_u32(&mut self, offset: usize, value: u32) {
        // SAFETY: `register` checked bounds and alignment.
        unsafe { self.register::<u32>(offset).write_volatile(value) }
    }
}

/// One recorded bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmioAccess {
    Read16 { offset: usize, value: u16 },
    Write16 { offset: usize, value: u16 },
    Read32 { offset: usize, value: u32 },
    Write32 { offset: usize, value: u32 },
}

#[derive(Debug)]
struct FakeMmioState {
    bytes: Vec<u8>,
    log: Vec<MmioAccess>,
}

/// Fake register window for testing
///
/// Backed by little-endian bytes, like the Zynq's ARM cores see the AXI
/// bus. Clones share the same window, so a test can keep a handle while
/// a backend owns another and inspect the transaction log afterwards.
///
/// ## Example
///
/// ```rust
/// use hal_zynq::mmio::{FakeMmio, Mmio, MmioAccess};
///
/// let mut mmio = FakeMmio::new(0x100);
/// let fpga = mmio.clone();
///
/// mmio.write_u16(0x20, 0xABCD);
/// assert_eq!(fpga.peek_u16(0x20), 0xABCD);
/// assert_eq!(
///     fpga.accesses(),
///     vec![MmioAccess::Write16 {
///         offset: 0x20,
///         value: 0xABCD
///     }]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct FakeMmio {
    state: Arc<Mutex<FakeMmioState>>,
}

impl FakeMmio {
    /// Creates a zero-filled window of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeMmioState {
                bytes: vec![0; len],
                log: Vec::new(),
            })),
        }
    }

    /// Returns all recorded transactions in issue order
    pub fn accesses(&self) -> Vec<MmioAccess> {
        self.state.lock().log.clone()
    }

    /// Clears the transaction log
    pub fn clear_accesses(&self) {
        self.state.lock().log.clear();
    }

    /// Models the FPGA updating a 16-bit register on its own
    ///
    /// Not recorded as bus traffic.
    pub fn hardware_write_u16(&self, offset: usize, value: u16) {
        let mut state = self.state.lock();
        Self::check(&state, offset, 2);
        state.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Models the FPGA updating a 32-bit register on its own
    pub fn hardware_write_u32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        Self::check(&state, offset, 4);
        state.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Inspects a 16-bit register without a bus transaction
    pub fn peek_u16(&self, offset: usize) -> u16 {
        let state = self.state.lock();
        Self::check(&state, offset, 2);
        u16::from_le_bytes([state.bytes[offset], state.bytes[offset + 1]])
    }

    /// Inspects a 32-bit register without a bus transaction
    pub fn peek_u32(&self, offset: usize) -> u32 {
        let state = self.state.lock();
        Self::check(&state, offset, 4);
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&state.bytes[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    fn check(state: &FakeMmioState, offset: usize, width: usize) {
        if offset % width != 0 || offset + width > state.bytes.len() {
            panic!(
                "FakeMmio: access of {} bytes at offset {:#x} outside window of {:#x} bytes",
                width,
                offset,
                state.bytes.len()
            );
        }
    }
}

impl Mmio for FakeMmio {
    fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    fn read_u16(&mut self, offset: usize) -> u16 {
        let value = self.peek_u16(offset);
        self.state
            .lock()
            .log
            .push(MmioAccess::Read16 { offset, value });
        value
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.hardware_write_u16(offset, value);
        self.state
            .lock()
            .log
            .push(MmioAccess::Write16 { offset, value });
    }

    fn read_u32(&mut self, offset: usize) -> u32 {
        let value = self.peek_u32(offset);
        self.state
            .lock()
            .log
            .push(MmioAccess::Read32 { offset, value });
        value
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.hardware_write_u32(offset, value);
        self.state
            .lock()
            .log
            .push(MmioAccess::Write32 { offset, value });
    }
}
