//! AuditSink — append-only log of balancing decisions.

use tracing::debug;

use flotilla_state::{Decision, StateStore};

/// Receives every allocation/deallocation decision with its justification.
///
/// Sink failures are logged by the engine but never block or roll back the
/// decision already taken.
pub trait AuditSink: Send + Sync {
    fn record(&self, decision: &Decision) -> anyhow::Result<()>;
}

/// Persists decisions to the state store's decisions table.
pub struct StateAuditSink {
    store: StateStore,
}

impl StateAuditSink {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl AuditSink for StateAuditSink {
    fn record(&self, decision: &Decision) -> anyhow::Result<()> {
        let seq = self.store.append_decision(decision)?;
        debug!(
            seq,
            processor = decision.processor_id,
            action = ?decision.action,
            "decision recorded"
        );
        Ok(())
    }
}

/// Discards all decisions (tests and dry runs).
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _decision: &Decision) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_state::DecisionAction;

    fn test_decision() -> Decision {
        Decision {
            processor_id: 1,
            pool_id: Some(2),
            tickets: 30,
            units_before: 1,
            units_after: 3,
            action: DecisionAction::OverflowGrant,
            justification: "test".to_string(),
            recorded_at: 1000,
        }
    }

    #[test]
    fn state_sink_persists_decisions() {
        let store = StateStore::open_in_memory().unwrap();
        let sink = StateAuditSink::new(store.clone());

        sink.record(&test_decision()).unwrap();
        sink.record(&test_decision()).unwrap();

        let decisions = store.list_decisions(10).unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, DecisionAction::OverflowGrant);
    }

    #[test]
    fn null_sink_accepts_everything() {
        assert!(NullAuditSink.record(&test_decision()).is_ok());
    }
}
