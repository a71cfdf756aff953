//! CoolingManager — per-processor scale hysteresis tracking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use flotilla_state::ProcessorId;

use crate::clock::{Clock, SystemClock};

/// Default ticket-growth ratio that overrides an active scale-up cooldown.
pub const DEFAULT_SCALE_UP_OVERRIDE: f64 = 0.30;

/// Default ticket-drop ratio that overrides an active scale-down cooldown.
pub const DEFAULT_SCALE_DOWN_OVERRIDE: f64 = 0.40;

/// Outcome of a cooldown probe, with a human-readable justification that
/// ends up in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Timestamped reference point for the last scale action in a direction.
#[derive(Debug, Clone, Copy)]
struct ScaleMark {
    /// Unix epoch seconds when the action was recorded.
    at: u64,
    /// Pending tickets at that moment — the override reference.
    tickets: u64,
}

#[derive(Debug, Default)]
struct Marks {
    ups: HashMap<ProcessorId, ScaleMark>,
    downs: HashMap<ProcessorId, ScaleMark>,
}

/// Tracks recent scale actions per processor and decides whether another
/// action in the same direction is currently permitted.
///
/// All reads and writes take an internal mutex, so diagnostic probes are
/// safe while the single balancing cycle holds the manager.
pub struct CoolingManager {
    clock: Arc<dyn Clock>,
    cooling_period: Duration,
    scale_up_override: f64,
    scale_down_override: f64,
    marks: Mutex<Marks>,
}

impl CoolingManager {
    /// Create a manager with the given cooling period and default override
    /// ratios, using wall-clock time.
    pub fn new(cooling_period: Duration) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            cooling_period,
            scale_up_override: DEFAULT_SCALE_UP_OVERRIDE,
            scale_down_override: DEFAULT_SCALE_DOWN_OVERRIDE,
            marks: Mutex::new(Marks::default()),
        }
    }

    /// Replace the time source (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the cooldown-escape ratios.
    pub fn with_override_ratios(mut self, scale_up: f64, scale_down: f64) -> Self {
        self.scale_up_override = scale_up;
        self.scale_down_override = scale_down;
        self
    }

    /// May `processor` be granted more units right now?
    pub fn can_scale_up(&self, processor: ProcessorId, tickets: u64, units: u32) -> Verdict {
        let marks = self.marks.lock().expect("cooling mutex poisoned");
        let now = self.clock.now_secs();

        // Never starve a processor with pending work and zero resources.
        if units == 0 && tickets > 0 {
            return Verdict::allow("no units assigned and tickets pending");
        }

        if let Some(mark) = marks.ups.get(&processor) {
            let elapsed = now.saturating_sub(mark.at);
            if elapsed < self.cooling_period.as_secs() {
                // Big enough a ticket surge overrides the cooldown. A zero
                // reference can never satisfy the ratio.
                if mark.tickets > 0
                    && tickets as f64 / mark.tickets as f64 >= 1.0 + self.scale_up_override
                {
                    return Verdict::allow(format!(
                        "ticket surge overrides cooldown ({} -> {})",
                        mark.tickets, tickets
                    ));
                }
                return Verdict::deny(format!(
                    "scale-up cooldown active ({}s of {}s remaining)",
                    self.cooling_period.as_secs() - elapsed,
                    self.cooling_period.as_secs()
                ));
            }
        }

        if let Some(mark) = marks.downs.get(&processor) {
            let elapsed = now.saturating_sub(mark.at);
            if elapsed < self.cooling_period.as_secs() {
                // A processor that just shrank may not immediately regrow.
                return Verdict::deny(format!(
                    "scale-down cooldown active ({}s of {}s remaining)",
                    self.cooling_period.as_secs() - elapsed,
                    self.cooling_period.as_secs()
                ));
            }
        }

        Verdict::allow("outside cooling period")
    }

    /// May `processor` release units right now?
    pub fn can_scale_down(&self, processor: ProcessorId, tickets: u64, _units: u32) -> Verdict {
        let marks = self.marks.lock().expect("cooling mutex poisoned");
        let now = self.clock.now_secs();

        if tickets == 0 {
            return Verdict::allow("no tickets pending");
        }

        if let Some(mark) = marks.downs.get(&processor) {
            let elapsed = now.saturating_sub(mark.at);
            if elapsed < self.cooling_period.as_secs() {
                if mark.tickets > 0
                    && tickets as f64 / mark.tickets as f64 <= 1.0 - self.scale_down_override
                {
                    return Verdict::allow(format!(
                        "ticket drop overrides cooldown ({} -> {})",
                        mark.tickets, tickets
                    ));
                }
                return Verdict::deny(format!(
                    "scale-down cooldown active ({}s of {}s remaining)",
                    self.cooling_period.as_secs() - elapsed,
                    self.cooling_period.as_secs()
                ));
            }
        }

        if let Some(mark) = marks.ups.get(&processor) {
            let elapsed = now.saturating_sub(mark.at);
            if elapsed < self.cooling_period.as_secs() {
                return Verdict::deny(format!(
                    "scale-up cooldown active ({}s of {}s remaining)",
                    self.cooling_period.as_secs() - elapsed,
                    self.cooling_period.as_secs()
                ));
            }
        }

        Verdict::allow("outside cooling period")
    }

    /// Record a completed scale-up, overwriting the previous mark.
    pub fn record_scale_up(&self, processor: ProcessorId, tickets: u64, units_granted: u32) {
        let mut marks = self.marks.lock().expect("cooling mutex poisoned");
        let at = self.clock.now_secs();
        marks.ups.insert(processor, ScaleMark { at, tickets });
        debug!(processor, tickets, units_granted, "scale-up recorded");
    }

    /// Record a completed scale-down, overwriting the previous mark.
    pub fn record_scale_down(&self, processor: ProcessorId, tickets: u64, units_released: u32) {
        let mut marks = self.marks.lock().expect("cooling mutex poisoned");
        let at = self.clock.now_secs();
        marks.downs.insert(processor, ScaleMark { at, tickets });
        debug!(processor, tickets, units_released, "scale-down recorded");
    }
}
