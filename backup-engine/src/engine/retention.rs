//! Tiered retention: daily, weekly and monthly.
//!
//! Everything younger than the daily cutoff is kept. Older backups survive
//! only if they fall on the weekly anchor day inside the weekly window, or on
//! the first of a month inside the monthly window (months count as 30 days).
//! Everything else is deleted, blob first and then its record.

use super::blob_key;
use crate::config::{Config, RetentionConfig};
use crate::model::{BackupRecord, PruneReport, RecordFilter};
use crate::store::{BlobStore, MetadataStore};
use crate::utils::cancel::CallContext;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retention counts plus the weekly anchor day.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub daily_days: u32,
    pub weekly_weeks: u32,
    pub monthly_months: u32,
    pub weekly_anchor: Weekday,
}

/// Instants separating the tiers for one pruning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoffs {
    pub daily: DateTime<Utc>,
    pub weekly: DateTime<Utc>,
    pub monthly: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    KeepDaily,
    KeepWeekly,
    KeepMonthly,
    Delete,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            daily_days: config.daily,
            weekly_weeks: config.weekly,
            monthly_months: config.monthly,
            weekly_anchor: config.weekly_anchor,
        }
    }
}

impl RetentionPolicy {
    pub fn cutoffs(&self, now: DateTime<Utc>) -> Cutoffs {
        Cutoffs {
            daily: now - Duration::days(i64::from(self.daily_days)),
            weekly: now - Duration::days(i64::from(self.weekly_weeks) * 7),
            monthly: now - Duration::days(i64::from(self.monthly_months) * 30),
        }
    }

    pub fn decide(&self, timestamp: DateTime<Utc>, cutoffs: &Cutoffs) -> RetentionDecision {
        if timestamp >= cutoffs.daily {
            RetentionDecision::KeepDaily
        } else if timestamp > cutoffs.weekly && timestamp.weekday() == self.weekly_anchor {
            RetentionDecision::KeepWeekly
        } else if timestamp > cutoffs.monthly && timestamp.day() == 1 {
            RetentionDecision::KeepMonthly
        } else {
            RetentionDecision::Delete
        }
    }
}

pub struct RetentionPruner {
    config: Arc<Config>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl RetentionPruner {
    pub fn new(config: Arc<Config>, blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config,
            blobs,
            metadata,
        }
    }

    pub async fn clean_old_backups(&self, ctx: &CallContext) -> PruneReport {
        self.clean_old_backups_at(Utc::now(), ctx).await
    }

    /// Prune relative to a given instant. Failures on one backup are
    /// collected and the remaining candidates are still processed.
    pub async fn clean_old_backups_at(&self, now: DateTime<Utc>, ctx: &CallContext) -> PruneReport {
        let policy = RetentionPolicy::from(&self.config.retention);
        let cutoffs = policy.cutoffs(now);
        let mut report = PruneReport::default();

        let candidates = match ctx
            .run("metadata list", self.metadata.list(&RecordFilter::older_than(cutoffs.daily)))
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Failed to list backups for pruning");
                report.errors.push(format!("Failed to list backups: {e}"));
                return report;
            }
        };

        info!(candidates = candidates.len(), ?cutoffs, "Pruning old backups");

        for record in candidates {
            if ctx.is_cancelled() {
                report.errors.push("Pruning cancelled".to_string());
                break;
            }

            let decision = policy.decide(record.timestamp, &cutoffs);
            if decision != RetentionDecision::Delete {
                debug!(backup_id = %record.id, ?decision, "Keeping backup");
                report.kept += 1;
                continue;
            }

            match self.delete_backup(&record, ctx).await {
                Ok(()) => {
                    info!(backup_id = %record.id, "Deleted expired backup");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(backup_id = %record.id, error = %e, "Failed to delete backup");
                    report.errors.push(format!("{}: {e}", record.id));
                }
            }
        }

        info!(deleted = report.deleted, kept = report.kept, errors = report.errors.len(), "Pruning finished");
        report
    }

    async fn delete_backup(&self, record: &BackupRecord, ctx: &CallContext) -> Result<()> {
        // Failed runs never leave a blob behind.
        if !record.is_failed() {
            let key = blob_key(self.config.blob_prefix(), record)?;
            match ctx.run("blob delete", self.blobs.delete(&key)).await {
                Ok(()) => {}
                Err(EngineError::BlobNotFound(_)) => {
                    debug!(backup_id = %record.id, key = %key, "Blob already gone");
                }
                Err(e) => return Err(e),
            }
        }

        ctx.run("metadata delete", self.metadata.delete_by_id(&record.id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Harness;
    use crate::model::{BackupStatus, BackupType};
    use crate::store::memory::MemoryMetadataStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use tokio_util::sync::CancellationToken;

    /// Cancels the pass after the first record is removed.
    struct CancelAfterDelete {
        inner: Arc<MemoryMetadataStore>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl MetadataStore for CancelAfterDelete {
        async fn insert(&self, record: &BackupRecord) -> Result<()> {
            self.inner.insert(record).await
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
            self.inner.get_by_id(id).await
        }

        async fn list(&self, filter: &RecordFilter) -> Result<Vec<BackupRecord>> {
            self.inner.list(filter).await
        }

        async fn delete_by_id(&self, id: &str) -> Result<bool> {
            let removed = self.inner.delete_by_id(id).await?;
            self.cancel.cancel();
            Ok(removed)
        }
    }

    fn now() -> DateTime<Utc> {
        // Friday
        Utc.with_ymd_and_hms(2024, 7, 12, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    async fn seed(h: &Harness, timestamp: DateTime<Utc>, status: BackupStatus) -> String {
        let record = BackupRecord {
            id: BackupRecord::make_id(BackupType::Full, timestamp),
            backup_type: BackupType::Full,
            timestamp,
            schema_version: "1.0".into(),
            tables: vec![],
            size_bytes: 1,
            compression: "gzip".into(),
            checksum: String::new(),
            status,
            error: None,
        };
        if status == BackupStatus::Completed {
            h.blobs
                .put(&h.key(&record), Bytes::from_static(b"x"), "application/gzip")
                .await
                .unwrap();
        }
        h.metadata.insert(&record).await.unwrap();
        record.id
    }

    async fn surviving(h: &Harness) -> Vec<String> {
        h.metadata_ids().await
    }

    fn harness_with_anchor(anchor: Weekday) -> impl std::future::Future<Output = Harness> {
        Harness::with_config(move |c| {
            c.retention.daily = 7;
            c.retention.weekly = 4;
            c.retention.monthly = 12;
            c.retention.weekly_anchor = anchor;
        })
    }

    #[test]
    fn test_decide_per_tier() {
        let policy = RetentionPolicy {
            daily_days: 7,
            weekly_weeks: 4,
            monthly_months: 12,
            weekly_anchor: Weekday::Tue,
        };
        let cutoffs = policy.cutoffs(now());

        assert_eq!(policy.decide(days_ago(2), &cutoffs), RetentionDecision::KeepDaily);
        // 2024-07-02 is a Tuesday
        assert_eq!(policy.decide(days_ago(10), &cutoffs), RetentionDecision::KeepWeekly);
        assert_eq!(policy.decide(days_ago(12), &cutoffs), RetentionDecision::Delete);
        assert_eq!(policy.decide(at(2024, 6, 1), &cutoffs), RetentionDecision::KeepMonthly);
        assert_eq!(policy.decide(at(2023, 7, 1), &cutoffs), RetentionDecision::Delete);
    }

    #[tokio::test]
    async fn test_daily_tier_is_never_touched() {
        let h = harness_with_anchor(Weekday::Sun).await;
        let young = seed(&h, days_ago(2), BackupStatus::Completed).await;

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report, PruneReport::default());
        assert_eq!(surviving(&h).await, vec![young]);
    }

    #[tokio::test]
    async fn test_weekly_tier_keeps_only_anchor_days() {
        let h = harness_with_anchor(Weekday::Tue).await;
        let anchor = seed(&h, days_ago(10), BackupStatus::Completed).await; // Tue 2024-07-02
        let _other = seed(&h, days_ago(12), BackupStatus::Completed).await; // Sun 2024-06-30

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.kept, 1);
        assert!(report.errors.is_empty());
        assert_eq!(surviving(&h).await, vec![anchor]);
    }

    #[tokio::test]
    async fn test_anchor_day_outside_weekly_window_is_deleted() {
        // 35 days back is Friday 2024-06-07: anchor weekday, but past 28 days
        let h = harness_with_anchor(Weekday::Fri).await;
        seed(&h, days_ago(35), BackupStatus::Completed).await;

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 1);
        assert!(surviving(&h).await.is_empty());
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_monthly_tier_keeps_first_of_month_within_window() {
        let h = harness_with_anchor(Weekday::Sun).await;
        let june = seed(&h, at(2024, 6, 1), BackupStatus::Completed).await; // 41 days
        let april = seed(&h, at(2024, 4, 1), BackupStatus::Completed).await; // 102 days
        seed(&h, days_ago(100), BackupStatus::Completed).await; // 2024-04-03
        seed(&h, at(2023, 7, 1), BackupStatus::Completed).await; // 377 days

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 2);
        assert_eq!(report.kept, 2);
        assert_eq!(surviving(&h).await, vec![april, june]);
    }

    #[tokio::test]
    async fn test_ages_across_all_tiers() {
        // Anchor Tuesday: 10 days back is kept by the weekly tier.
        let h = harness_with_anchor(Weekday::Tue).await;
        let two = seed(&h, days_ago(2), BackupStatus::Completed).await;
        let ten = seed(&h, days_ago(10), BackupStatus::Completed).await;
        seed(&h, days_ago(35), BackupStatus::Completed).await;
        seed(&h, days_ago(100), BackupStatus::Completed).await;

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 2);
        assert_eq!(surviving(&h).await, vec![ten, two]);
    }

    #[tokio::test]
    async fn test_second_run_deletes_nothing() {
        let h = harness_with_anchor(Weekday::Tue).await;
        for days in [2, 9, 10, 20, 35, 100, 400] {
            seed(&h, days_ago(days), BackupStatus::Completed).await;
        }

        let first = h.pruner.clean_old_backups_at(now(), &h.ctx).await;
        assert!(first.deleted > 0);

        let second = h.pruner.clean_old_backups_at(now(), &h.ctx).await;
        assert_eq!(second.deleted, 0);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failed_records_and_missing_blobs_are_cleaned() {
        let h = harness_with_anchor(Weekday::Sun).await;
        seed(&h, days_ago(40), BackupStatus::Failed).await;
        let orphan = seed(&h, days_ago(50), BackupStatus::Completed).await;
        let record = h.metadata.get_by_id(&orphan).await.unwrap().unwrap();
        h.blobs.delete(&h.key(&record)).await.unwrap();

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 2);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(surviving(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_stop_others() {
        let h = harness_with_anchor(Weekday::Sun).await;
        let broken = BackupRecord {
            id: "full-1".into(),
            backup_type: BackupType::Full,
            timestamp: days_ago(60),
            schema_version: "1.0".into(),
            tables: vec![],
            size_bytes: 1,
            compression: "lz4".into(),
            checksum: "00".into(),
            status: BackupStatus::Completed,
            error: None,
        };
        h.metadata.insert(&broken).await.unwrap();
        seed(&h, days_ago(50), BackupStatus::Completed).await;

        let report = h.pruner.clean_old_backups_at(now(), &h.ctx).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("full-1:"));
        assert_eq!(surviving(&h).await, vec!["full-1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_pass() {
        let h = harness_with_anchor(Weekday::Sun).await;
        let oldest = seed(&h, days_ago(101), BackupStatus::Completed).await;
        let older = seed(&h, days_ago(100), BackupStatus::Completed).await;

        let cancel = CancellationToken::new();
        let metadata = Arc::new(CancelAfterDelete {
            inner: h.metadata.clone(),
            cancel: cancel.clone(),
        });
        let pruner = RetentionPruner::new(h.config.clone(), h.blobs.clone(), metadata);
        let ctx = CallContext::new(cancel, std::time::Duration::from_secs(5));

        let report = pruner.clean_old_backups_at(now(), &ctx).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, vec!["Pruning cancelled"]);
        assert_eq!(surviving(&h).await, vec![older]);
        assert!(!h.blobs.contains(&format!("backups/{oldest}.json.gz")).await);
    }
}
