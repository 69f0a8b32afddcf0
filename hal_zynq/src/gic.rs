//! Platform interrupt controller seam.
//!
//! On the Zynq the PL-to-PS interrupt lines go through the ARM generic
//! interrupt controller. The backend only needs three things from it:
//! route a line to a trampoline, unmask the line, and clear the pending
//! state once the trampoline has acknowledged the interrupt.

use std::collections::HashMap;
use std::sync::Arc;

use hal::{InterruptContext, IrqLine, SetupError};
use parking_lot::Mutex;

/// Function the controller runs in interrupt context when a line fires
pub type IrqTrampoline = Box<dyn Fn(&mut IrqFrame) + Send + Sync + 'static>;

/// One interrupt delivery as seen by a trampoline
#[derive(Debug)]
pub struct IrqFrame {
    context: InterruptContext,
    acknowledged: bool,
}

impl IrqFrame {
    /// Creates a frame for a delivery on `line`
    pub fn new(line: IrqLine, event_count: u32) -> Self {
        Self {
            context: InterruptContext::new(line, event_count),
            acknowledged: false,
        }
    }

    /// Hardware-provided context for this delivery
    pub fn context(&self) -> &InterruptContext {
        &self.context
    }

    /// Asks the controller to clear the pending state on return
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    /// Returns whether the trampoline acknowledged the delivery
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }
}

/// Interrupt controller trait
///
/// ## Implementation Notes
///
/// - `connect` binds one trampoline per line; connecting an already
///   connected line fails with `SetupError::LineBindFailed`
/// - the trampoline may run on another thread at any time after `enable`
/// - a delivery the trampoline did not acknowledge stays pending
/// - a lost hardware link is permanent; `link_failed` keeps reporting it
pub trait InterruptController: Send {
    /// Routes `line` to `trampoline`
    fn connect(&mut self, line: IrqLine, trampoline: IrqTrampoline) -> Result<(), SetupError>;

    /// Unmasks `line`
    fn enable(&mut self, line: IrqLine) -> Result<(), SetupError>;

    /// Masks `line` and drops its trampoline
    fn disconnect(&mut self, line: IrqLine);

    /// Returns whether interrupt delivery stopped on a hardware failure
    fn link_failed(&self) -> bool;
}

#[derive(Default)]
struct FakeGicState {
    trampolines: HashMap<IrqLine, Arc<dyn Fn(&mut IrqFrame) + Send + Sync>>,
    enabled: HashMap<IrqLine, bool>,
    pending: HashMap<IrqLine, bool>,
    event_counts: HashMap<IrqLine, u32>,
    ack_count: u64,
    refuse_connect: bool,
    link_failed: bool,
}

/// Simulated interrupt controller for tests
///
/// Clones share state, so a test can keep a handle to raise and service
/// interrupts while the backend owns another.
#[derive(Clone, Default)]
pub struct FakeGic {
    state: Arc<Mutex<FakeGicState>>,
}

impl FakeGic {
    /// Creates a controller with no lines connected
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a controller that refuses every `connect`
    pub fn refusing_connect() -> Self {
        let gic = Self::new();
        gic.state.lock().refuse_connect = true;
        gic
    }

    /// Models losing the link to the hardware
    ///
    /// No interrupt is delivered afterwards.
    pub fn fail_link(&self) {
        self.state.lock().link_failed = true;
    }

    /// Marks `line` pending, as the hardware would
    pub fn raise(&self, line: IrqLine) {
        self.state.lock().pending.insert(line, true);
    }

    /// Returns whether `line` is pending
    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.state
            .lock()
            .pending
            .get(&line)
            .copied()
            .unwrap_or(false)
    }

    /// Returns whether `line` has a trampoline
    pub fn is_connected(&self, line: IrqLine) -> bool {
        self.state.lock().trampolines.contains_key(&line)
    }

    /// Returns whether `line` is unmasked
    pub fn is_enabled(&self, line: IrqLine) -> bool {
        self.state
            .lock()
            .enabled
            .get(&line)
            .copied()
            .unwrap_or(false)
    }

    /// Number of deliveries acknowledged so far
    pub fn ack_count(&self) -> u64 {
        self.state.lock().ack_count
    }

    /// Delivers every pending, enabled, connected line once
    ///
    /// Returns the number of trampolines run. Trampolines run without the
    /// controller lock held.
    pub fn service(&self) -> usize {
        let mut lines: Vec<IrqLine> = {
            let state = self.state.lock();
            if state.link_failed {
                return 0;
            }
            state
                .pending
                .iter()
                .filter(|(line, pending)| {
                    **pending
                        && state.enabled.get(*line).copied().unwrap_or(false)
                        && state.trampolines.contains_key(*line)
                })
                .map(|(line, _)| *line)
                .collect()
        };
        lines.sort_by_key(|line| line.id());

        let mut delivered = 0;
        for line in lines {
            let (trampoline, event_count) = {
                let mut state = self.state.lock();
                let Some(trampoline) = state.trampolines.get(&line).cloned() else {
                    continue;
                };
                let count = state.event_counts.entry(line).or_insert(0);
                *count = count.wrapping_add(1);
                (trampoline, *count)
            };

            let mut frame = IrqFrame::new(line, event_count);
            trampoline(&mut frame);
            delivered += 1;

            if frame.is_acknowledged() {
                let mut state = self.state.lock();
                state.pending.insert(line, false);
                state.ack_count += 1;
            }
        }
        delivered
    }

    /// Raises `line` and services it
    pub fn fire(&self, line: IrqLine) -> usize {
        self.raise(line);
        self.service()
    }
}

impl std::fmt::Debug for FakeGic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeGic")
            .field("connected", &state.trampolines.keys().collect::<Vec<_>>())
            .field("ack_count", &state.ack_count)
            .finish_non_exhaustive()
    }
}

impl InterruptController for FakeGic {
    fn connect(&mut self, line: IrqLine, trampoline: IrqTrampoline) -> Result<(), SetupError> {
        let mut state = self.state.lock();
        if state.refuse_connect || state.trampolines.contains_key(&line) {
            return Err(SetupError::LineBindFailed(line));
        }
        state.trampolines.insert(line, Arc::from(trampoline));
        Ok(())
    }

    fn enable(&mut self, line: IrqLine) -> Result<(), SetupError> {
        let mut state = self.state.lock();
        if !state.trampolines.contains_key(&line) {
            return Err(SetupError::LineBindFailed(line));
        }
        state.enabled.insert(line, true);
        Ok(())
    }

    fn disconnect(&mut self, line: IrqLine) {
        let mut state = self.state.lock();
        state.trampolines.remove(&line);
        state.enabled.remove(&line);
    }

    fn link_failed(&self) -> bool {
        self.state.lock().link_failed
    }
}
