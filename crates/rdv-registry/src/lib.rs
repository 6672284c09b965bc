//! The client registry: the authoritative mapping from a stable client
//! identity to its live connection record.
//!
//! A single reader-writer lock protects the map; per-record mutation (the
//! connection handle, last-activity timestamp, NAT classification) happens
//! under the record's own state, never under the registry lock — so a
//! socket write is never attempted while the registry lock is held.

pub mod record;

pub use record::{ClientRecord, ConnectionHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rdv_types::{ClientId, EndpointAddr, NatType};

/// Outcome of an `admit` call.
#[derive(Debug)]
pub enum AdmitOutcome {
    /// The record was admitted. `evicted` holds the previous occupant of
    /// the same id, if any (policy: the older connection is displaced).
    Admitted { evicted: Option<Arc<ClientRecord>> },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AtCapacity,
}

/// A read-consistent, capacity-free view of one registered client, as
/// returned by [`Registry::snapshot`].
#[derive(Debug, Clone)]
pub struct PublicView {
    pub id: ClientId,
    pub display_name: String,
    pub public_addr: EndpointAddr,
    pub nat_type: NatType,
}

/// The client registry.
pub struct Registry {
    map: RwLock<HashMap<ClientId, Arc<ClientRecord>>>,
    active_count: AtomicUsize,
    max_connections: usize,
}

impl Registry {
    /// `max_connections == 0` means unbounded.
    pub fn new(max_connections: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Admit `record`. Duplicate ids evict the prior occupant and always
    /// succeed (the net `active_count` is unchanged); a fresh id is
    /// rejected with [`RejectReason::AtCapacity`] once the registry is
    /// full.
    pub fn admit(&self, record: Arc<ClientRecord>) -> AdmitOutcome {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        let evicted = map.remove(&record.id);

        if evicted.is_none()
            && self.max_connections > 0
            && self.active_count.load(Ordering::SeqCst) >= self.max_connections
        {
            // Put back nothing — there was nothing to put back — and refuse.
            return AdmitOutcome::Rejected(RejectReason::AtCapacity);
        }

        map.insert(record.id.clone(), record);
        if evicted.is_none() {
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
        AdmitOutcome::Admitted { evicted }
    }

    /// Idempotent: a no-op if `id` is absent.
    pub fn evict(&self, id: &ClientId) -> Option<Arc<ClientRecord>> {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        let removed = map.remove(id);
        if removed.is_some() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Remove the record at `id`, but only if it's still `expected` — a
    /// connection unwinding after being displaced by a duplicate
    /// registration (§4.2's admit-evicts-duplicate policy) must not evict
    /// whatever new occupant has since taken its id. Identity is compared
    /// with [`Arc::ptr_eq`], not equality of contents, so a fresh record
    /// that happens to carry the same id is never mistaken for `expected`.
    pub fn evict_if(&self, id: &ClientId, expected: &Arc<ClientRecord>) -> Option<Arc<ClientRecord>> {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        match map.get(id) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                let removed = map.remove(id);
                self.active_count.fetch_sub(1, Ordering::SeqCst);
                removed
            }
            _ => None,
        }
    }

    /// O(1) lookup. Refreshes `last_active` on a hit.
    pub fn lookup(&self, id: &ClientId) -> Option<Arc<ClientRecord>> {
        let record = {
            let map = self.map.read().unwrap_or_else(|e| e.into_inner());
            map.get(id).cloned()
        };
        if let Some(record) = &record {
            record.touch();
        }
        record
    }

    /// Refresh `last_active` without returning the record.
    pub fn touch(&self, id: &ClientId) {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = map.get(id) {
            record.touch();
        }
    }

    /// A read-consistent copy of every record's public view. Ordering is
    /// unspecified.
    pub fn snapshot(&self) -> Vec<PublicView> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.values()
            .map(|record| PublicView {
                id: record.id.clone(),
                display_name: record.display_name.clone(),
                public_addr: record.public_addr,
                nat_type: record.nat_type(),
            })
            .collect()
    }

    /// Remove every record idle past `idle_horizon` as of `now`, closing
    /// their connections. Scans under a read lock into a candidate list,
    /// then removes each candidate under the write lock, re-checking the
    /// idle predicate so a message that arrived between the scan and the
    /// removal isn't reaped out from under a now-live connection.
    pub async fn reap(&self, now: Instant, idle_horizon: Duration) -> Vec<Arc<ClientRecord>> {
        let candidates: Vec<ClientId> = {
            let map = self.map.read().unwrap_or_else(|e| e.into_inner());
            map.iter()
                .filter(|(_, record)| now.saturating_duration_since(record.last_active()) > idle_horizon)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let reaped: Vec<Arc<ClientRecord>> = {
            let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
            let mut reaped = Vec::with_capacity(candidates.len());
            for id in candidates {
                let still_idle = map
                    .get(&id)
                    .map(|record| now.saturating_duration_since(record.last_active()) > idle_horizon)
                    .unwrap_or(false);
                if still_idle {
                    if let Some(record) = map.remove(&id) {
                        reaped.push(record);
                    }
                }
            }
            reaped
        };

        self.active_count.fetch_sub(reaped.len(), Ordering::SeqCst);
        for record in &reaped {
            record.request_close().await;
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdv_types::SessionToken;
    use tokio::sync::mpsc;

    fn make_record(id: &str) -> Arc<ClientRecord> {
        let (tx, _rx) = mpsc::channel(8);
        let conn = ConnectionHandle::new(tx);
        Arc::new(ClientRecord::new(
            ClientId::from(id),
            format!("display-{id}"),
            EndpointAddr::new("203.0.113.1".parse().expect("ip"), 40000),
            EndpointAddr::new("192.168.1.2".parse().expect("ip"), 50000),
            SessionToken::empty(),
            conn,
        ))
    }

    #[test]
    fn admit_rejects_at_capacity() {
        let registry = Registry::new(1);
        assert!(matches!(
            registry.admit(make_record("a")),
            AdmitOutcome::Admitted { evicted: None }
        ));
        assert!(matches!(
            registry.admit(make_record("b")),
            AdmitOutcome::Rejected(RejectReason::AtCapacity)
        ));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn admit_duplicate_id_evicts_and_keeps_count_stable() {
        let registry = Registry::new(0);
        registry.admit(make_record("a"));
        let outcome = registry.admit(make_record("a"));
        assert!(matches!(outcome, AdmitOutcome::Admitted { evicted: Some(_) }));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn evict_if_skips_a_record_that_was_already_displaced() {
        let registry = Registry::new(0);
        let first = make_record("a");
        registry.admit(first.clone());
        let second = make_record("a");
        registry.admit(second.clone());

        // `first`'s owning connection unwinds after being displaced; its
        // teardown must not evict `second`, which now holds the same id.
        assert!(registry.evict_if(&ClientId::from("a"), &first).is_none());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.lookup(&ClientId::from("a")).is_some());
    }

    #[test]
    fn evict_if_removes_the_matching_current_occupant() {
        let registry = Registry::new(0);
        let record = make_record("a");
        registry.admit(record.clone());

        assert!(registry.evict_if(&ClientId::from("a"), &record).is_some());
        assert_eq!(registry.active_count(), 0);
        assert!(registry.lookup(&ClientId::from("a")).is_none());
    }

    #[test]
    fn evict_is_idempotent() {
        let registry = Registry::new(0);
        registry.admit(make_record("a"));
        assert!(registry.evict(&ClientId::from("a")).is_some());
        assert!(registry.evict(&ClientId::from("a")).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn lookup_refreshes_last_active() {
        let registry = Registry::new(0);
        registry.admit(make_record("a"));
        let before = registry.lookup(&ClientId::from("a")).expect("present").last_active();
        std::thread::sleep(Duration::from_millis(5));
        registry.touch(&ClientId::from("a"));
        let after = registry.lookup(&ClientId::from("a")).expect("present").last_active();
        assert!(after >= before);
    }

    #[test]
    fn snapshot_returns_one_view_per_record() {
        let registry = Registry::new(0);
        registry.admit(make_record("a"));
        registry.admit(make_record("b"));
        let views = registry.snapshot();
        assert_eq!(views.len(), 2);
    }

    #[tokio::test]
    async fn reap_removes_only_idle_records() {
        let registry = Registry::new(0);
        registry.admit(make_record("stale"));
        std::thread::sleep(Duration::from_millis(20));
        registry.admit(make_record("fresh"));
        registry.touch(&ClientId::from("fresh"));

        let horizon = Duration::from_millis(10);
        let reaped = registry.reap(Instant::now(), horizon).await;
        assert!(reaped.iter().any(|r| r.id == ClientId::from("stale")));
        assert!(registry.lookup(&ClientId::from("fresh")).is_some());
    }
}
