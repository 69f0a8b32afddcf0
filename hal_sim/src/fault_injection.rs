//! Deterministic fault injection for the simulated bus
//!
//! Faults are planned up front and applied in a fixed order, so a test
//! that injects a fault sees exactly the same failure on every run.
//!
//! ## Example
//!
//! ```
//! use hal_sim::fault_injection::{BusFault, FaultPlan, SetupFault};
//!
//! let plan = FaultPlan::new()
//!     .with_setup_fault(SetupFault::ControllerUnavailable)
//!     .with_bus_fault(BusFault::FailAt { addr: 0x0200 });
//! assert_eq!(plan.bus_faults().len(), 1);
//! ```

use hal::{SetupError, WordAddress};

/// A fault that makes `setup()` fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFault {
    /// The interrupt controller cannot be acquired
    ControllerUnavailable,
    /// The register window cannot be mapped
    WindowUnavailable,
}

impl SetupFault {
    /// The error `setup()` reports for this fault
    pub fn to_error(self) -> SetupError {
        match self {
            SetupFault::ControllerUnavailable => {
                SetupError::ControllerUnavailable("injected fault".to_string())
            }
            SetupFault::WindowUnavailable => {
                SetupError::WindowUnavailable("injected fault".to_string())
            }
        }
    }
}

/// A fault on bus transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Every transaction at `addr` fails
    FailAt { addr: WordAddress },

    /// The transaction after `count` successful ones fails, and so does
    /// every transaction after it
    LinkDownAfter { count: u64 },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    setup_fault: Option<SetupFault>,
    bus_faults: Vec<BusFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `setup()` fail with `fault`
    pub fn with_setup_fault(mut self, fault: SetupFault) -> Self {
        self.setup_fault = Some(fault);
        self
    }

    /// Adds a bus fault to the plan
    pub fn with_bus_fault(mut self, fault: BusFault) -> Self {
        self.bus_faults.push(fault);
        self
    }

    /// The planned setup fault
    pub fn setup_fault(&self) -> Option<SetupFault> {
        self.setup_fault
    }

    /// The planned bus faults
    pub fn bus_faults(&self) -> &[BusFault] {
        &self.bus_faults
    }

    /// Returns whether the transaction at `addr` fails, given the number
    /// of transactions that completed before it
    pub fn fails(&self, addr: WordAddress, completed: u64) -> bool {
        self.bus_faults.iter().any(|fault| match *fault {
            BusFault::FailAt { addr: target } => target == addr,
            BusFault::LinkDownAfter { count } => completed >= count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan_never_fails() {
        let plan = FaultPlan::new();
        assert!(plan.setup_fault().is_none());
        assert!(!plan.fails(0, 0));
        assert!(!plan.fails(0xFFFF, u64::MAX));
    }

    #[test]
    fn test_fail_at_address() {
        let plan = FaultPlan::new().with_bus_fault(BusFault::FailAt { addr: 0x10 });
        assert!(plan.fails(0x10, 0));
        assert!(plan.fails(0x10, 99));
        assert!(!plan.fails(0x11, 0));
    }

    #[test]
    fn test_link_down_after() {
        let plan = FaultPlan::new().with_bus_fault(BusFault::LinkDownAfter { count: 2 });
        assert!(!plan.fails(0, 0));
        assert!(!plan.fails(0, 1));
        assert!(plan.fails(0, 2));
        assert!(plan.fails(0, 3));
    }

    #[test]
    fn test_setup_fault_errors() {
        assert!(matches!(
            SetupFault::ControllerUnavailable.to_error(),
            SetupError::ControllerUnavailable(_)
        ));
        assert!(matches!(
            SetupFault::WindowUnavailable.to_error(),
            SetupError::WindowUnavailable(_)
        ));
    }
}
