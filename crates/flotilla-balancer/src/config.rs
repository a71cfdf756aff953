//! Engine configuration.

/// Tunables for the balancing engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fallback tickets-per-unit ratio for processors that don't set one.
    pub default_tickets_per_unit: u32,
    /// When true, pool-scoped processors never draw from the general pool
    /// during the overflow phase.
    pub strict_pool_isolation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tickets_per_unit: 10,
            strict_pool_isolation: true,
        }
    }
}
