use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::auditor::{AuditReport, Auditor};
use super::reconciler::{ReconcileReport, Reconciler};
use super::snapshot::GroupSnapshot;
use crate::error::SyncError;
use crate::store::SyncStore;

#[derive(Default)]
struct GroupSlot {
    generation: AtomicU64,
    running: Mutex<()>,
}

struct CachedReport {
    stored_at: Instant,
    report: AuditReport,
}

/// Debounced, single-flight audits per group.
///
/// Every trigger bumps the group's generation; a delayed audit only runs if no
/// newer trigger arrived while it slept. At most one audit per group runs at a
/// time and the latest finished report is kept for readers until it is older
/// than the retention window. A group's slot is dropped once nothing is
/// pending or running for it.
pub struct AuditScheduler {
    store: Arc<dyn SyncStore>,
    auditor: Arc<Auditor>,
    retention: Duration,
    slots: parking_lot::Mutex<HashMap<Uuid, Arc<GroupSlot>>>,
    latest: RwLock<HashMap<Uuid, CachedReport>>,
}

impl AuditScheduler {
    pub fn new(store: Arc<dyn SyncStore>, auditor: Arc<Auditor>, retention: Duration) -> Self {
        Self {
            store,
            auditor,
            retention,
            slots: parking_lot::Mutex::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, group_id: Uuid) -> Arc<GroupSlot> {
        self.slots.lock().entry(group_id).or_default().clone()
    }

    /// Drop the group's slot if `slot` is the last handle outside the map.
    fn release(&self, group_id: Uuid, slot: Arc<GroupSlot>) {
        let mut slots = self.slots.lock();
        let idle = slots
            .get(&group_id)
            .map_or(false, |current| Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2);
        if idle {
            slots.remove(&group_id);
        }
    }

    /// Queue an audit of `group_id` after `delay`.
    ///
    /// The handle resolves to `None` when a later trigger superseded this one
    /// or the audit could not load the group.
    pub fn schedule(self: &Arc<Self>, group_id: Uuid, delay: Duration) -> JoinHandle<Option<AuditReport>> {
        let slot = self.slot(group_id);
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Audit of group {} scheduled in {:?} (gen {})", group_id, delay, generation);

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let report = scheduler.run_scheduled(group_id, &slot, generation, delay).await;
            scheduler.release(group_id, slot);
            report
        })
    }

    async fn run_scheduled(
        &self,
        group_id: Uuid,
        slot: &GroupSlot,
        generation: u64,
        delay: Duration,
    ) -> Option<AuditReport> {
        tokio::time::sleep(delay).await;
        if slot.generation.load(Ordering::SeqCst) != generation {
            debug!("Audit of group {} superseded before start", group_id);
            return None;
        }

        let _running = slot.running.lock().await;
        // Another trigger may have landed while we waited for the lock
        if slot.generation.load(Ordering::SeqCst) != generation {
            debug!("Audit of group {} superseded while queued", group_id);
            return None;
        }

        match self.audit(group_id).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("❌ Scheduled audit of group {} failed: {}", group_id, e);
                None
            }
        }
    }

    /// Audit now, waiting for any audit of the same group already running.
    pub async fn run_now(&self, group_id: Uuid) -> Result<AuditReport, SyncError> {
        let slot = self.slot(group_id);
        slot.generation.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _running = slot.running.lock().await;
            self.audit(group_id).await
        };
        self.release(group_id, slot);
        result
    }

    /// Audit, repair and re-audit while holding the group's audit lock, so no
    /// scheduled audit can interleave and the cached report is the re-audit.
    pub async fn reconcile_now(
        &self,
        group_id: Uuid,
        reconciler: &Reconciler,
    ) -> Result<ReconcileReport, SyncError> {
        let slot = self.slot(group_id);
        slot.generation.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _running = slot.running.lock().await;
            self.audit_and_repair(group_id, reconciler).await
        };
        self.release(group_id, slot);
        result
    }

    async fn audit_and_repair(
        &self,
        group_id: Uuid,
        reconciler: &Reconciler,
    ) -> Result<ReconcileReport, SyncError> {
        let audit = self.audit(group_id).await?;
        let snapshot = GroupSnapshot::load(self.store.as_ref(), group_id).await?;
        let report = reconciler.reconcile(&snapshot, &audit.discrepancies).await?;
        self.remember(report.audit.clone()).await;
        Ok(report)
    }

    pub async fn latest(&self, group_id: Uuid) -> Option<AuditReport> {
        self.latest
            .read()
            .await
            .get(&group_id)
            .filter(|cached| cached.stored_at.elapsed() < self.retention)
            .map(|cached| cached.report.clone())
    }

    async fn remember(&self, report: AuditReport) {
        let mut latest = self.latest.write().await;
        latest.retain(|_, cached| cached.stored_at.elapsed() < self.retention);
        latest.insert(
            report.group_id,
            CachedReport {
                stored_at: Instant::now(),
                report,
            },
        );
    }

    async fn audit(&self, group_id: Uuid) -> Result<AuditReport, SyncError> {
        let snapshot = GroupSnapshot::load(self.store.as_ref(), group_id).await?;
        let report = self.auditor.audit(&snapshot).await;
        info!(
            "🔍 Audit of group {} finished: {} discrepancies",
            group_id,
            report.discrepancies.len()
        );
        self.remember(report.clone()).await;
        Ok(report)
    }

    #[cfg(test)]
    fn tracked_groups(&self) -> usize {
        self.slots.lock().len()
    }

    #[cfg(test)]
    async fn cached_reports(&self) -> usize {
        self.latest.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ContentKind, NewGroupAssignment};
    use crate::store::MemoryStore;
    use crate::sync::testing::{group_with_members, services};

    fn scheduler_with_retention(store: &Arc<MemoryStore>, retention: Duration) -> Arc<AuditScheduler> {
        let dyn_store: Arc<dyn SyncStore> = store.clone();
        Arc::new(AuditScheduler::new(
            dyn_store.clone(),
            Arc::new(Auditor::new(dyn_store)),
            retention,
        ))
    }

    fn scheduler(store: &Arc<MemoryStore>) -> Arc<AuditScheduler> {
        scheduler_with_retention(store, Duration::from_secs(60))
    }

    async fn assign_course(store: &MemoryStore, group_id: Uuid) {
        store
            .insert_content_assignment(NewGroupAssignment {
                group_id,
                kind: ContentKind::Course,
                content_id: Uuid::new_v4(),
                assigned_by: Uuid::new_v4(),
                start_date: None,
                end_date: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_later_trigger_supersedes_earlier() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 2).await;
        assign_course(&store, group_id).await;
        let scheduler = scheduler(&store);

        let first = scheduler.schedule(group_id, Duration::from_millis(50));
        let second = scheduler.schedule(group_id, Duration::from_millis(10));

        assert!(first.await.unwrap().is_none());
        let report = second.await.unwrap().unwrap();
        assert_eq!(report.discrepancies.len(), 1);

        let latest = scheduler.latest(group_id).await.unwrap();
        assert_eq!(latest.audited_at, report.audited_at);
    }

    #[tokio::test]
    async fn test_run_now_cancels_pending_trigger() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, _) = group_with_members(&store, 1).await;
        let scheduler = scheduler(&store);

        let pending = scheduler.schedule(group_id, Duration::from_millis(20));
        let report = scheduler.run_now(group_id).await.unwrap();
        assert!(report.consistent);
        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_groups_are_scheduled_independently() {
        let store = Arc::new(MemoryStore::new());
        let (a, _) = group_with_members(&store, 1).await;
        let (b, _) = group_with_members(&store, 1).await;
        let scheduler = scheduler(&store);

        let first = scheduler.schedule(a, Duration::from_millis(5));
        let second = scheduler.schedule(b, Duration::from_millis(5));

        assert!(first.await.unwrap().is_some());
        assert!(second.await.unwrap().is_some());
        assert!(scheduler.latest(a).await.is_some());
        assert!(scheduler.latest(b).await.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_holds_the_group_lock() {
        let store = Arc::new(MemoryStore::new());
        let (group_id, members) = group_with_members(&store, 2).await;
        assign_course(&store, group_id).await;
        let scheduler = scheduler(&store);
        let reconciler = services(&store).reconciler;

        let pending = scheduler.schedule(group_id, Duration::from_millis(5));
        let report = scheduler.reconcile_now(group_id, &reconciler).await.unwrap();

        assert_eq!(report.outcome.succeeded.len(), members.len());
        assert!(report.audit.consistent);
        // The queued trigger was superseded, so the cache still holds the re-audit
        assert!(pending.await.unwrap().is_none());
        let latest = scheduler.latest(group_id).await.unwrap();
        assert_eq!(latest.audited_at, report.audit.audited_at);
        assert!(latest.consistent);
    }

    #[tokio::test]
    async fn test_idle_groups_are_released() {
        let store = Arc::new(MemoryStore::new());
        let (a, _) = group_with_members(&store, 1).await;
        let (b, _) = group_with_members(&store, 1).await;
        let scheduler = scheduler(&store);

        let pending = scheduler.schedule(a, Duration::from_millis(20));
        assert_eq!(scheduler.tracked_groups(), 1);
        scheduler.run_now(b).await.unwrap();
        assert_eq!(scheduler.tracked_groups(), 1);

        assert!(pending.await.unwrap().is_some());
        assert_eq!(scheduler.tracked_groups(), 0);

        scheduler.run_now(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(scheduler.tracked_groups(), 0);
    }

    #[tokio::test]
    async fn test_expired_reports_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let (a, _) = group_with_members(&store, 1).await;
        let (b, _) = group_with_members(&store, 1).await;
        let scheduler = scheduler_with_retention(&store, Duration::from_millis(50));

        scheduler.run_now(a).await.unwrap();
        assert!(scheduler.latest(a).await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(scheduler.latest(a).await.is_none());

        scheduler.run_now(b).await.unwrap();
        assert_eq!(scheduler.cached_reports().await, 1);
        assert!(scheduler.latest(b).await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(&store);
        let err = scheduler.run_now(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::GroupNotFound(_)));
        assert!(scheduler.schedule(Uuid::new_v4(), Duration::ZERO).await.unwrap().is_none());
    }
}
