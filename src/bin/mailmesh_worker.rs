//! Standalone worker process: claims jobs from the durable queue, builds
//! the right provider adapter per account, and runs delta sync (spec
//! §4.6-§4.8).

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use mailmesh_core::config::Config;
use mailmesh_core::error::{MailmeshError, MailmeshResult};
use mailmesh_core::folder::RawFolder;
use mailmesh_core::providers::imap::connection::ImapConnectionConfig;
use mailmesh_core::providers::imap::ImapAdapter;
use mailmesh_core::providers::graph::GraphAdapter;
use mailmesh_core::providers::ProviderAdapter;
use mailmesh_core::queue::{JobPayload, QueueBackend, QueueGate, QueueName};
use mailmesh_core::store::models::MailAccount;
use mailmesh_core::store::{FtsIndex, MirrorStore};
use mailmesh_core::sync::{Orchestrator, Scheduler};
use mailmesh_core::vault::{GraphOAuth, Vault};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Arc::new(Config::load()?);

    // Exposes queue depth, job outcomes, and per-job latency on the
    // Prometheus exporter's default listener (SPEC_FULL.md §10.5).
    PrometheusBuilder::new()
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    mailmesh_core::store::run_migrations(&pool).await?;

    let fts = Arc::new(FtsIndex::open_or_create(std::path::Path::new(&config.fts_index_dir))?);
    let store = MirrorStore::with_fts_index(pool.clone(), fts);
    let vault = Vault::new(config.encryption_key.clone())?;
    let queue = QueueBackend::new(pool);
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), vault, queue.clone()));

    let (_scheduler_handle, _scheduler_join) = Scheduler::spawn(store, queue.clone());

    let gates = [
        QueueGate::new(QueueName::InitialSync),
        QueueGate::new(QueueName::IncrementalSync),
        QueueGate::new(QueueName::AttachmentUpload),
    ];

    tracing::info!("mailmesh worker started");

    loop {
        let mut claimed_any = false;
        for gate in &gates {
            let Some(job) = queue.claim_next(gate.name).await? else {
                continue;
            };
            claimed_any = true;
            let permit = gate.acquire().await;
            let queue_name = gate.name.as_str();
            let queue = queue.clone();
            let orchestrator = orchestrator.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                let started = std::time::Instant::now();
                let outcome = match run_job(&orchestrator, &config, job.payload).await {
                    Ok(()) => {
                        if let Err(err) = queue.complete(job_id).await {
                            tracing::error!(error = %err, "failed to mark job completed");
                        }
                        "completed"
                    }
                    Err(err) if err.aborts_account() => {
                        tracing::warn!(error = %err, "credential rejected, dead-lettering job");
                        if let Err(e) = queue.fail_permanently(job_id).await {
                            tracing::error!(error = %e, "failed to dead-letter job");
                        }
                        "dead_lettered"
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "job failed, scheduling retry");
                        if let Err(e) = queue.fail(job_id, job.attempt_count).await {
                            tracing::error!(error = %e, "failed to record job failure");
                        }
                        "failed_retry"
                    }
                };
                metrics::histogram!("mailmesh_job_duration_seconds", "queue" => queue_name)
                    .record(started.elapsed().as_secs_f64());
                metrics::counter!(
                    "mailmesh_jobs_total",
                    "queue" => queue_name,
                    "outcome" => outcome,
                )
                .increment(1);
            });
        }

        if !claimed_any {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Dispatches one claimed job: builds the account's provider adapter,
/// discovers and orders folders, and delta-syncs each one. A folder-scoped
/// error is logged and skipped; siblings continue (spec §7 per-folder
/// isolation). Only [`MailmeshError::aborts_account`] propagates to the
/// caller, which dead-letters the whole job with no retry.
async fn run_job(
    orchestrator: &Orchestrator,
    config: &Config,
    payload: JobPayload,
) -> MailmeshResult<()> {
    match payload {
        JobPayload::InitialSync(p) => sync_account(orchestrator, config, p.account_id, true).await,
        JobPayload::IncrementalSync(p) => {
            sync_account(orchestrator, config, p.account_id, false).await
        }
        JobPayload::AttachmentUpload(p) => {
            // Attachment storage is delegated to an external blob sink
            // (spec non-goal: no attachment bytes live in the mirror);
            // wiring a concrete sink is left to the hosting application.
            tracing::info!(message_id = %p.message_id, filename = %p.filename, "attachment upload queued, no sink configured");
            Ok(())
        }
    }
}

async fn sync_account(
    orchestrator: &Orchestrator,
    config: &Config,
    account_id: Uuid,
    initial: bool,
) -> MailmeshResult<()> {
    let account = orchestrator
        .store()
        .get_account(account_id)
        .await?
        .ok_or_else(|| MailmeshError::NotFound(format!("account {account_id}")))?;

    let adapter = build_adapter(orchestrator, config, &account).await?;

    let raw_folders = adapter.list_folders().await?;
    let canonical_order = Orchestrator::discover_and_order(&raw_folders);

    for canonical in &canonical_order {
        let raw_path = raw_folders
            .iter()
            .find(|f| mailmesh_core::folder::normalize(f) == *canonical)
            .map(|f| f.path.clone())
            .unwrap_or_else(|| canonical.clone());

        let result = if account.is_oauth() {
            orchestrator
                .delta_sync_folder_graph(
                    adapter.as_ref(),
                    account_id,
                    canonical,
                    account.last_synced_at.unwrap_or_else(|| {
                        chrono::Utc::now() - chrono::Duration::days(30)
                    }),
                )
                .await
        } else {
            orchestrator
                .delta_sync_folder(adapter.as_ref(), account_id, canonical, &raw_path, initial)
                .await
        };

        match result {
            Ok(outcome) => {
                tracing::info!(folder = %outcome.folder, emails_synced = outcome.emails_synced, "folder synced");
            }
            Err(err) if err.aborts_account() => return Err(err),
            Err(err) => {
                tracing::warn!(folder = %canonical, error = %err, "folder sync failed, continuing siblings");
            }
        }
    }

    Ok(())
}

async fn build_adapter(
    orchestrator: &Orchestrator,
    config: &Config,
    account: &MailAccount,
) -> MailmeshResult<Box<dyn ProviderAdapter>> {
    if let Some(refresh_token) = &account.refresh_token {
        let oauth = GraphOAuth::new(config.ms_client_id.clone(), config.ms_client_secret.clone())?;
        let decrypted_refresh = orchestrator.vault().decrypt(refresh_token).map_err(|_| {
            MailmeshError::CredentialRejected {
                account_id: account.id.to_string(),
                message: "stored refresh token failed to decrypt".to_string(),
            }
        })?;
        let refreshed = oauth.refresh(&account.id.to_string(), &decrypted_refresh).await?;
        orchestrator
            .persist_rotated_tokens(account.id, &refreshed.access_token, refreshed.refresh_token.as_ref())
            .await?;
        return Ok(Box::new(GraphAdapter::new(refreshed.access_token)));
    }

    let encrypted_password = account.encrypted_password.as_ref().ok_or_else(|| {
        MailmeshError::CredentialRejected {
            account_id: account.id.to_string(),
            message: "account has neither a refresh token nor a stored password".to_string(),
        }
    })?;
    let password = orchestrator.vault().decrypt(encrypted_password).map_err(|_| {
        MailmeshError::CredentialRejected {
            account_id: account.id.to_string(),
            message: "stored password failed to decrypt".to_string(),
        }
    })?;

    let (host, port) = Orchestrator::imap_endpoint(&account.provider).ok_or_else(|| {
        MailmeshError::Config(format!("no IMAP endpoint known for provider {}", account.provider))
    })?;

    let connection_config = ImapConnectionConfig {
        host: host.to_string(),
        port,
        username: account.email.clone(),
        password: Secret::new(password.expose_secret().clone()),
        tls_reject_unauthorized: config.tls_reject_unauthorized,
        certs_dir: config.certs_dir.clone(),
    };
    Ok(Box::new(ImapAdapter::new(connection_config)))
}
