//! Offer pool and placement.
//!
//! Offers live here between an `Offers` event and the end of the planning
//! round that consumes them. Assignment is first-fit in arrival order:
//! latency over packing, since the master's allocator already biases what
//! we are offered. Offers arriving in one event are ordered by offer-id so
//! repeated runs place identically.

pub mod filter;

use std::collections::HashMap;
use std::sync::Mutex;

use bosun_events::{Offer, ResourceQuota};
use bosun_id::OfferId;
use thiserror::Error;
use tracing::debug;

use crate::task::Task;

use filter::{Filter, FilterSpec};

/// Errors from placement and filter registration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceManagerError {
    /// No pooled offer satisfies the task's resources and filters.
    #[error("no offer matches task '{0}'")]
    NoMatch(String),

    /// A filter used an unknown operator/type or is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// One pooled offer with its remaining capacity for the current round.
struct OfferEntry {
    offer: Offer,
    remaining: ResourceQuota,
    consumed: bool,
}

/// The offer pool and per-task filter registry.
///
/// Guarded by plain mutexes; nothing here awaits, so the control API can
/// read concurrently with the event loop without an async lock.
#[derive(Default)]
pub struct ResourceManager {
    pool: Mutex<Vec<OfferEntry>>,
    filters: Mutex<HashMap<String, Vec<Filter>>>,
}

impl ResourceManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append offers to the pool in arrival order.
    ///
    /// Offers delivered in the same event are sorted by offer-id so
    /// first-fit has a deterministic tie-break.
    pub fn add_offers(&self, mut offers: Vec<Offer>) {
        offers.sort_by(|a, b| a.id.cmp(&b.id));
        let mut pool = self.pool.lock().unwrap();
        for offer in offers {
            let remaining = offer.quota();
            pool.push(OfferEntry {
                offer,
                remaining,
                consumed: false,
            });
        }
    }

    /// Snapshot of pooled offers, for diagnostics and batch planning.
    #[must_use]
    pub fn offers(&self) -> Vec<Offer> {
        self.pool
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.offer.clone())
            .collect()
    }

    /// True when any offer is pooled.
    #[must_use]
    pub fn has_resources(&self) -> bool {
        !self.pool.lock().unwrap().is_empty()
    }

    /// Register placement predicates for a task.
    ///
    /// All specs are validated before any is stored, so a deploy with one
    /// bad filter registers nothing.
    pub fn add_filters(
        &self,
        task_name: &str,
        specs: &[FilterSpec],
    ) -> Result<(), ResourceManagerError> {
        let parsed = specs
            .iter()
            .map(Filter::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        if !parsed.is_empty() {
            self.filters
                .lock()
                .unwrap()
                .insert(task_name.to_string(), parsed);
        }
        Ok(())
    }

    /// Register already-validated predicates (recovery path).
    pub fn restore_filters(&self, task_name: &str, filters: Vec<Filter>) {
        if !filters.is_empty() {
            self.filters
                .lock()
                .unwrap()
                .insert(task_name.to_string(), filters);
        }
    }

    /// Drop a task's predicates once the task is gone.
    pub fn remove_filters(&self, task_name: &str) {
        self.filters.lock().unwrap().remove(task_name);
    }

    /// Snapshot of a task's predicates, for diagnostics.
    #[must_use]
    pub fn filters_for(&self, task_name: &str) -> Vec<Filter> {
        self.filters
            .lock()
            .unwrap()
            .get(task_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Pick an offer for the task: first entry, in arrival order, whose
    /// remaining capacity covers the request and whose attributes pass
    /// every one of the task's filters.
    ///
    /// The winning entry's remaining capacity is reduced, so later tasks in
    /// the same planning round can share the offer's residual. The entry is
    /// marked consumed and will not be returned by [`Self::drain_unused`].
    pub fn assign(&self, task: &Task) -> Result<Offer, ResourceManagerError> {
        let request = task.spec.resources;
        let filters = self.filters_for(task.name());

        let mut pool = self.pool.lock().unwrap();
        for entry in pool.iter_mut() {
            if !entry.remaining.covers(&request) {
                continue;
            }
            if !filters.iter().all(|f| f.matches(&entry.offer)) {
                continue;
            }

            entry.remaining.subtract(&request);
            entry.consumed = true;
            debug!(
                task = %task.name(),
                offer = %entry.offer.id,
                agent = %entry.offer.agent_id,
                "Assigned offer"
            );
            return Ok(entry.offer.clone());
        }

        Err(ResourceManagerError::NoMatch(task.name().to_string()))
    }

    /// Remove a rescinded offer so no later assignment can pick it.
    ///
    /// Returns true when the offer was still pooled.
    pub fn rescind(&self, offer_id: &OfferId) -> bool {
        let mut pool = self.pool.lock().unwrap();
        let before = pool.len();
        pool.retain(|entry| entry.offer.id != *offer_id);
        pool.len() != before
    }

    /// End-of-round sweep: clears the pool and returns the ids of offers
    /// no assignment touched, for the caller to decline.
    ///
    /// Clearing everything is what forbids cross-round residual reuse.
    pub fn drain_unused(&self) -> Vec<OfferId> {
        let mut pool = self.pool.lock().unwrap();
        let unused = pool
            .iter()
            .filter(|entry| !entry.consumed)
            .map(|entry| entry.offer.id.clone())
            .collect();
        pool.clear();
        unused
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskSpec};
    use bosun_events::Resource;
    use std::collections::BTreeMap;

    fn offer(id: &str, hostname: &str, cpu: f64, mem: f64) -> Offer {
        Offer {
            id: id.parse().unwrap(),
            agent_id: format!("agent-{hostname}").parse().unwrap(),
            hostname: hostname.to_string(),
            attributes: BTreeMap::new(),
            resources: vec![
                Resource::scalar("cpus", cpu),
                Resource::scalar("mem", mem),
            ],
        }
    }

    fn task(name: &str, cpu: f64, mem: f64) -> Task {
        Task::new(TaskSpec {
            name: name.to_string(),
            resources: ResourceQuota::new(cpu, mem, 0.0),
            ..TaskSpec::default()
        })
    }

    #[test]
    fn test_first_fit_arrival_order() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 2.0, 1024.0)]);
        manager.add_offers(vec![offer("offer-2", "b", 2.0, 1024.0)]);

        let assigned = manager.assign(&task("t", 1.0, 128.0)).unwrap();
        assert_eq!(assigned.id.as_str(), "offer-1");
    }

    #[test]
    fn test_same_event_tie_break_by_id() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![
            offer("offer-9", "a", 2.0, 1024.0),
            offer("offer-1", "b", 2.0, 1024.0),
        ]);

        let assigned = manager.assign(&task("t", 1.0, 128.0)).unwrap();
        assert_eq!(assigned.id.as_str(), "offer-1");
    }

    #[test]
    fn test_no_match_when_resources_short() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 0.5, 64.0)]);

        let result = manager.assign(&task("t", 1.0, 128.0));
        assert!(matches!(result, Err(ResourceManagerError::NoMatch(_))));
    }

    #[test]
    fn test_assign_consumes_offer() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 1.0, 128.0)]);

        manager.assign(&task("t1", 1.0, 128.0)).unwrap();
        // Fully consumed; a second task of the same size cannot fit.
        let result = manager.assign(&task("t2", 1.0, 128.0));
        assert!(result.is_err());
    }

    #[test]
    fn test_residual_reuse_within_round() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 2.0, 1024.0)]);

        let first = manager.assign(&task("t1", 1.0, 512.0)).unwrap();
        let second = manager.assign(&task("t2", 1.0, 512.0)).unwrap();
        assert_eq!(first.id, second.id);

        // Residual is gone; round is fully packed.
        assert!(manager.assign(&task("t3", 0.5, 64.0)).is_err());
        // The shared offer was consumed, so nothing is left to decline.
        assert!(manager.drain_unused().is_empty());
    }

    #[test]
    fn test_filters_gate_assignment() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![
            offer("offer-1", "host-a", 2.0, 1024.0),
            offer("offer-2", "host-b", 2.0, 1024.0),
        ]);
        manager
            .add_filters(
                "t",
                &[FilterSpec {
                    kind: "HOSTNAME".to_string(),
                    operator: "EQ".to_string(),
                    subject: None,
                    values: vec!["host-b".to_string()],
                }],
            )
            .unwrap();

        let assigned = manager.assign(&task("t", 1.0, 128.0)).unwrap();
        assert_eq!(assigned.hostname, "host-b");
    }

    #[test]
    fn test_invalid_filter_registers_nothing() {
        let manager = ResourceManager::new();
        let specs = vec![
            FilterSpec {
                kind: "HOSTNAME".to_string(),
                operator: "EQ".to_string(),
                subject: None,
                values: vec!["host-a".to_string()],
            },
            FilterSpec {
                kind: "HOSTNAME".to_string(),
                operator: "RESEMBLES".to_string(),
                subject: None,
                values: vec!["host".to_string()],
            },
        ];

        assert!(manager.add_filters("t", &specs).is_err());
        assert!(manager.filters_for("t").is_empty());
    }

    #[test]
    fn test_rescind_removes_offer() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 2.0, 1024.0)]);

        assert!(manager.rescind(&"offer-1".parse().unwrap()));
        assert!(!manager.rescind(&"offer-1".parse().unwrap()));
        assert!(manager.assign(&task("t", 0.1, 1.0)).is_err());
        assert!(!manager.has_resources());
    }

    #[test]
    fn test_drain_unused_clears_pool() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![
            offer("offer-1", "a", 2.0, 1024.0),
            offer("offer-2", "b", 2.0, 1024.0),
        ]);

        manager.assign(&task("t", 1.0, 128.0)).unwrap();
        let unused = manager.drain_unused();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].as_str(), "offer-2");
        assert!(!manager.has_resources());
    }

    #[test]
    fn test_epsilon_tolerance() {
        let manager = ResourceManager::new();
        manager.add_offers(vec![offer("offer-1", "a", 0.1 + 0.2, 128.0)]);

        // Exact-float comparison would reject this request.
        assert!(manager.assign(&task("t", 0.3, 128.0)).is_ok());
    }
}
