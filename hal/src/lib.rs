//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the contract between the PDP-8 emulation core and
//! the FPGA memory/I/O bus on the SoC.
//!
//! ## Philosophy
//!
//! **The hardware is the single source of truth.**
//!
//! Every memory access is a direct bus transaction. There is no buffering,
//! caching, or retry at this layer; a failed transaction is surfaced to the
//! caller immediately.
//!
//! ## Design Principles
//!
//! 1. **One flat trait**: [`BusHal`] is the whole contract, backends are
//!    interchangeable variants of it
//! 2. **Two execution domains**: interrupts arrive asynchronously; the
//!    registered handler is the only state shared with them
//! 3. **Minimal unsafe**: isolated to the binding publish and the backends'
//!    register accessors
//! 4. **Testable**: simulation and fake backends implement the same trait

pub mod bus;
pub mod config;
pub mod interrupts;
pub mod memory;
pub mod setup;

pub use bus::BusHal;
pub use config::{ConfigError, HalConfig};
pub use interrupts::{BindingSlot, InterruptContext, InterruptHandler, IrqLine};
pub use memory::{MemoryError, MemoryWindow, Word, WordAddress};
pub use setup::SetupError;
