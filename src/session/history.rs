use crate::session::HistoryId;
use crate::store::{HistoryStatus, HistoryStore, QueryHistoryRecord, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a history record whose insert may still be in flight.
#[derive(Debug, Clone)]
pub struct HistoryTicket {
    rx: watch::Receiver<Option<HistoryId>>,
}

impl HistoryTicket {
    /// Waits for the insert. `None` when it failed.
    pub async fn id(mut self) -> Option<HistoryId> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(id) => *id,
            Err(_) => None,
        }
    }
}

/// Writes the user's query history. Failures here are logged, never surfaced
/// to the workflow.
#[derive(Clone)]
pub struct HistoryLogger {
    store: Arc<dyn HistoryStore>,
}

impl HistoryLogger {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn record_generated(
        &self,
        user_id: &str,
        natural_language_query: &str,
        generated_sql: &str,
    ) -> Result<HistoryId, StoreError> {
        let id = self
            .store
            .insert_generated(user_id, natural_language_query, generated_sql)
            .await?;
        info!("Recorded generated query {} for {}", id, user_id);
        Ok(id)
    }

    pub async fn mark_executed(&self, id: HistoryId) -> Result<(), StoreError> {
        self.store.mark_executed(id).await?;
        info!("Marked query {} as executed", id);
        Ok(())
    }

    /// Fire-and-forget insert; the ticket resolves to the new id.
    pub fn spawn_record_generated(
        &self,
        user_id: String,
        natural_language_query: String,
        generated_sql: String,
    ) -> HistoryTicket {
        let (tx, rx) = watch::channel(None);
        let logger = self.clone();
        tokio::spawn(async move {
            match logger
                .record_generated(&user_id, &natural_language_query, &generated_sql)
                .await
            {
                Ok(id) => {
                    tx.send_replace(Some(id));
                }
                Err(e) => warn!("Failed to log generated query: {}", e),
            }
        });
        HistoryTicket { rx }
    }

    /// Fire-and-forget promotion of the ticket's record to executed.
    pub fn spawn_mark_executed(&self, ticket: HistoryTicket) -> JoinHandle<()> {
        let logger = self.clone();
        tokio::spawn(async move {
            let Some(id) = ticket.id().await else {
                debug!("No history record to mark as executed");
                return;
            };
            if let Err(e) = logger.mark_executed(id).await {
                warn!("Failed to log executed query {}: {}", id, e);
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub generated: usize,
    pub executed: usize,
    pub total: usize,
    /// Change in `total` against the previous active day, in percent.
    pub percentage_rise: Option<f64>,
}

/// Per-day counts, oldest day first. A promoted record counts as executed only.
pub fn daily_stats(records: &[QueryHistoryRecord]) -> Vec<DailyStats> {
    let mut days: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for record in records {
        let counts = days.entry(record.created_at.date_naive()).or_default();
        match record.status {
            HistoryStatus::Generated => counts.0 += 1,
            HistoryStatus::Executed => counts.1 += 1,
        }
    }

    let mut stats: Vec<DailyStats> = Vec::with_capacity(days.len());
    for (date, (generated, executed)) in days {
        let total = generated + executed;
        let percentage_rise = stats.last().map(|prev| percentage_rise(prev.total, total));
        stats.push(DailyStats {
            date,
            generated,
            executed,
            total,
            percentage_rise,
        });
    }
    stats
}

fn percentage_rise(previous: usize, current: usize) -> f64 {
    if previous == 0 {
        return if current == 0 { 0.0 } else { 100.0 };
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn record(id: i64, day: u32, status: HistoryStatus) -> QueryHistoryRecord {
        QueryHistoryRecord {
            id: HistoryId(id),
            user_id: "alice".to_string(),
            natural_language_query: "q".to_string(),
            generated_sql: "SELECT 1".to_string(),
            status,
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn generated_then_executed_keeps_texts() {
        let store = Arc::new(MemoryStore::new());
        let logger = HistoryLogger::new(store.clone());

        let id = logger
            .record_generated("alice", "top customers", "SELECT name FROM customers")
            .await
            .unwrap();
        logger.mark_executed(id).await.unwrap();

        let records = store.history_snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, HistoryStatus::Executed);
        assert_eq!(records[0].natural_language_query, "top customers");
        assert_eq!(records[0].generated_sql, "SELECT name FROM customers");
    }

    #[tokio::test]
    async fn marking_twice_leaves_one_executed_record() {
        let store = Arc::new(MemoryStore::new());
        let logger = HistoryLogger::new(store.clone());
        let id = logger.record_generated("alice", "q", "SELECT 1").await.unwrap();

        logger.mark_executed(id).await.unwrap();
        logger.mark_executed(id).await.unwrap();

        let records = store.history_snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, HistoryStatus::Executed);
    }

    #[tokio::test]
    async fn ticket_resolves_to_inserted_id() {
        let store = Arc::new(MemoryStore::new());
        let logger = HistoryLogger::new(store.clone());

        let ticket = logger.spawn_record_generated(
            "alice".to_string(),
            "q".to_string(),
            "SELECT 1".to_string(),
        );
        let id = ticket.clone().id().await.unwrap();
        logger.spawn_mark_executed(ticket).await.unwrap();

        let records = store.history_snapshot();
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].status, HistoryStatus::Executed);
    }

    #[tokio::test]
    async fn failed_insert_yields_empty_ticket() {
        let store = Arc::new(MemoryStore::new());
        store.fail_history.store(true, Ordering::SeqCst);
        let logger = HistoryLogger::new(store.clone());

        let ticket = logger.spawn_record_generated(
            "alice".to_string(),
            "q".to_string(),
            "SELECT 1".to_string(),
        );
        logger.spawn_mark_executed(ticket).await.unwrap();

        assert!(store.history_snapshot().is_empty());
        assert_eq!(store.mark_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn daily_stats_compare_with_previous_day() {
        let records = vec![
            record(1, 1, HistoryStatus::Generated),
            record(2, 1, HistoryStatus::Executed),
            record(3, 2, HistoryStatus::Executed),
            record(4, 2, HistoryStatus::Executed),
            record(5, 2, HistoryStatus::Generated),
            record(6, 4, HistoryStatus::Generated),
        ];

        let stats = daily_stats(&records);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].percentage_rise, None);
        assert_eq!((stats[1].generated, stats[1].executed, stats[1].total), (1, 2, 3));
        assert_eq!(stats[1].percentage_rise, Some(50.0));
        let change = stats[2].percentage_rise.unwrap();
        assert!((change + 66.67).abs() < 0.01);
    }

    #[test]
    fn rise_from_zero() {
        assert_eq!(percentage_rise(0, 4), 100.0);
        assert_eq!(percentage_rise(0, 0), 0.0);
    }
}
