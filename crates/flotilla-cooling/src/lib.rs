//! flotilla-cooling — scale hysteresis for the balancing engine.
//!
//! Tracks the last scale-up and scale-down per processor and refuses to
//! repeat a scale action in the same direction within the cooling period,
//! unless the pending-ticket count moved enough to justify an override.
//!
//! # Decision rules
//!
//! ```text
//! can_scale_up:
//!   units == 0 && tickets > 0          → allow (never starve)
//!   up cooldown active                 → allow iff tickets/ref >= 1.30
//!   down cooldown active               → deny (no override)
//!   otherwise                          → allow
//!
//! can_scale_down:
//!   tickets == 0                       → allow
//!   down cooldown active               → allow iff tickets/ref <= 0.60
//!   up cooldown active                 → deny (no override)
//!   otherwise                          → allow
//! ```
//!
//! State lives only in process memory: a restart clears all cooldowns.

pub mod clock;
pub mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{CoolingManager, Verdict};
