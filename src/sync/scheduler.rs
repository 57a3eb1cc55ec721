//! Periodic incremental-sync scheduler (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;

use crate::queue::{IncrementalSyncPayload, JobPayload, QueueBackend};
use crate::store::models::MailAccount;
use crate::store::MirrorStore;

const TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Whether an account should get an incremental-sync job this tick
/// (spec §4.8: "accounts with empty `syncedFolders` are skipped — they
/// await completion of their initial sync").
fn eligible_for_incremental_sync(account: &MailAccount) -> bool {
    !account.synced_folders.is_empty()
}

/// Enqueues an incremental-sync job for every account whose
/// `lastSyncedAt` is stalest-first, once per tick (spec §4.8: "every 5
/// minutes, enqueue an incremental sync job for each active account").
pub struct Scheduler {
    store: MirrorStore,
    queue: QueueBackend,
    shutdown: mpsc::Receiver<()>,
}

pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Scheduler {
    pub fn spawn(store: MirrorStore, queue: QueueBackend) -> (Arc<SchedulerHandle>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let scheduler = Scheduler {
            store,
            queue,
            shutdown: shutdown_rx,
        };
        let join = tokio::spawn(scheduler.run());
        (Arc::new(SchedulerHandle { shutdown_tx }), join)
    }

    async fn run(mut self) {
        let mut ticker = interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "scheduler tick failed");
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn tick(&self) -> crate::error::MailmeshResult<()> {
        let accounts = self.store.active_accounts_oldest_first().await?;
        metrics::gauge!("mailmesh_scheduler_active_accounts").set(accounts.len() as f64);
        for account in accounts {
            if !eligible_for_incremental_sync(&account) {
                continue;
            }
            let payload = JobPayload::IncrementalSync(IncrementalSyncPayload {
                account_id: account.id,
                email: account.email.clone(),
                folders: account.synced_folders.clone(),
            });
            if let Err(err) = self.queue.enqueue(payload).await {
                tracing::warn!(account_id = %account.id, error = %err, "failed to enqueue incremental sync");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn account(synced_folders: Vec<String>) -> MailAccount {
        MailAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "user@gmail.com".to_string(),
            provider: "gmail".to_string(),
            encrypted_password: Some("ct".to_string()),
            access_token: None,
            refresh_token: None,
            synced_folders,
            last_fetched_uid: 0,
            last_synced_at: None,
            folder_ids: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn account_awaiting_initial_sync_is_skipped() {
        assert!(!eligible_for_incremental_sync(&account(vec![])));
    }

    #[test]
    fn account_with_synced_folders_is_eligible() {
        assert!(eligible_for_incremental_sync(&account(vec!["INBOX".to_string()])));
    }
}
