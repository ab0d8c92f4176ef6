//! Incident lifecycle: deduplicates repeated failures into one open incident
//! per target and decides when a transition warrants notifying.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Incident, Severity};
use crate::storage::{IncidentStore, StoreError};

/// Which severity transitions on an already-open incident re-trigger
/// notification. The exact matrix is operator policy, not a fixed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPolicy {
    /// Re-notify only when severity strictly increases (default).
    Escalation,
    /// Re-notify on every failing probe while open.
    Always,
    /// Never re-notify while open.
    Never,
}

impl EscalationPolicy {
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "escalation" => Some(Self::Escalation),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    fn renotifies(&self, previous: Severity, current: Severity) -> bool {
        match self {
            Self::Escalation => current > previous,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Outcome of feeding one classification result into the state machine. The
/// caller dispatches notifications only for `Opened` and `Escalated`.
#[derive(Debug, Clone)]
pub enum IncidentOutcome {
    /// First failure after being healthy/resolved; notify.
    Opened(Incident),
    /// Already open and the policy says this severity change re-notifies.
    Escalated(Incident),
    /// Already open, no re-notification warranted.
    StillOpen,
    /// Succeeding probe closed an open incident.
    Resolved(Incident),
    /// Succeeding probe with nothing open.
    Healthy,
}

pub struct IncidentManager {
    store: Arc<dyn IncidentStore>,
    policy: EscalationPolicy,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn IncidentStore>, policy: EscalationPolicy) -> Self {
        Self { store, policy }
    }

    /// Records a failing classification for `target_id`.
    pub async fn record_failure(
        &self,
        target_id: Uuid,
        severity: Severity,
    ) -> Result<IncidentOutcome, StoreError> {
        match self.store.find_open(target_id).await? {
            None => {
                let incident = self.store.open(target_id, severity).await?;
                info!(%target_id, incident_id = %incident.id, ?severity, "Opened incident.");
                Ok(IncidentOutcome::Opened(incident))
            }
            Some(existing) => {
                let previous = existing.severity;
                let incident = if severity > previous {
                    self.store.update_severity(existing.id, severity).await?
                } else {
                    existing
                };
                if self.policy.renotifies(previous, severity) {
                    warn!(
                        %target_id,
                        incident_id = %incident.id,
                        from = ?previous,
                        to = ?severity,
                        "Incident escalated."
                    );
                    Ok(IncidentOutcome::Escalated(incident))
                } else {
                    Ok(IncidentOutcome::StillOpen)
                }
            }
        }
    }

    pub async fn open_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.list_open().await?.len())
    }

    /// Records a succeeding classification for `target_id`.
    pub async fn record_success(&self, target_id: Uuid) -> Result<IncidentOutcome, StoreError> {
        match self.store.resolve(target_id).await? {
            Some(incident) => {
                info!(%target_id, incident_id = %incident.id, "Incident resolved.");
                Ok(IncidentOutcome::Resolved(incident))
            }
            None => Ok(IncidentOutcome::Healthy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentState;
    use crate::storage::memory::MemoryIncidentStore;

    fn manager(store: Arc<MemoryIncidentStore>, policy: EscalationPolicy) -> IncidentManager {
        IncidentManager::new(store, policy)
    }

    #[tokio::test]
    async fn repeated_failures_keep_a_single_open_incident() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mgr = manager(store.clone(), EscalationPolicy::Escalation);
        let target = Uuid::new_v4();

        assert!(matches!(
            mgr.record_failure(target, Severity::High).await.unwrap(),
            IncidentOutcome::Opened(_)
        ));
        for _ in 0..5 {
            assert!(matches!(
                mgr.record_failure(target, Severity::High).await.unwrap(),
                IncidentOutcome::StillOpen
            ));
        }

        let open: Vec<_> = store
            .all()
            .await
            .into_iter()
            .filter(|i| i.state == IncidentState::Open)
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn escalation_renotifies_only_on_severity_increase() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mgr = manager(store, EscalationPolicy::Escalation);
        let target = Uuid::new_v4();

        mgr.record_failure(target, Severity::Warning).await.unwrap();
        let escalated = mgr.record_failure(target, Severity::High).await.unwrap();
        assert!(matches!(escalated, IncidentOutcome::Escalated(ref i) if i.severity == Severity::High));

        // De-escalation keeps the recorded severity and stays quiet.
        let quiet = mgr.record_failure(target, Severity::Warning).await.unwrap();
        assert!(matches!(quiet, IncidentOutcome::StillOpen));
    }

    #[tokio::test]
    async fn flapping_notifies_once_per_transition_into_open() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mgr = manager(store.clone(), EscalationPolicy::Escalation);
        let target = Uuid::new_v4();
        let mut notifications = 0;

        for _ in 0..2 {
            if matches!(
                mgr.record_failure(target, Severity::High).await.unwrap(),
                IncidentOutcome::Opened(_) | IncidentOutcome::Escalated(_)
            ) {
                notifications += 1;
            }
            assert!(matches!(
                mgr.record_success(target).await.unwrap(),
                IncidentOutcome::Resolved(_)
            ));
        }

        assert_eq!(notifications, 2);
        assert_eq!(store.all().await.len(), 2);

        // Invariant: at most one open incident per target at any time.
        let open = store
            .all()
            .await
            .into_iter()
            .filter(|i| i.state == IncidentState::Open)
            .count();
        assert_eq!(open, 0);
    }

    #[tokio::test]
    async fn success_without_open_incident_is_healthy() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mgr = manager(store, EscalationPolicy::Escalation);
        assert!(matches!(
            mgr.record_success(Uuid::new_v4()).await.unwrap(),
            IncidentOutcome::Healthy
        ));
    }

    #[tokio::test]
    async fn never_policy_suppresses_all_renotification() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mgr = manager(store, EscalationPolicy::Never);
        let target = Uuid::new_v4();

        mgr.record_failure(target, Severity::Warning).await.unwrap();
        assert!(matches!(
            mgr.record_failure(target, Severity::High).await.unwrap(),
            IncidentOutcome::StillOpen
        ));
    }
}
