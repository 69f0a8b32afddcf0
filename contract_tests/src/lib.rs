//! # HAL Contract Tests
//!
//! This crate holds the checks every `BusHal` backend must pass, so the
//! simulated bus and the Zynq backend cannot drift apart.
//!
//! ## Philosophy
//!
//! - **Contract as code**: each property is a function over a [`HalHarness`]
//! - **Backend agnostic**: the checks only speak `BusHal`; the harness
//!   supplies the hardware side (raising interrupts, writing memory)
//! - **Same checks everywhere**: `tests/` runs every property against
//!   every backend
//!
//! ## Structure
//!
//! - [`harness`]: the [`HalHarness`] seam and one harness per backend
//! - [`properties`]: the checks themselves

pub mod harness;
pub mod properties;

pub use harness::{HalHarness, InterruptSource, SimHarness, ZynqHarness};
