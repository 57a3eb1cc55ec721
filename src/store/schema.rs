//! Schema bootstrap (SPEC_FULL.md §10.6).
//!
//! Grounded on the teacher's `mail/database.rs::run_migrations` — plain
//! `CREATE TABLE IF NOT EXISTS` statements executed once at process
//! startup, rather than a separate migration-file toolchain the example
//! pack never reaches for. Adapted from the teacher's SQLite dialect to
//! the Postgres dialect SPEC_FULL.md's `tsvector` trigger requires.

use sqlx::PgPool;

use crate::error::MailmeshResult;

/// Creates every table, index, and the FTS-refresh trigger if they don't
/// already exist. Idempotent: safe to call on every worker startup.
pub async fn run_migrations(pool: &PgPool) -> MailmeshResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mail_account (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            email TEXT NOT NULL,
            provider TEXT NOT NULL,
            encrypted_password TEXT,
            access_token TEXT,
            refresh_token TEXT,
            synced_folders TEXT[] NOT NULL DEFAULT '{}',
            last_fetched_uid BIGINT NOT NULL DEFAULT 0,
            last_synced_at TIMESTAMPTZ,
            folder_ids JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (user_id, email)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message (
            id UUID PRIMARY KEY,
            account_id UUID NOT NULL REFERENCES mail_account(id) ON DELETE CASCADE,
            uid BIGINT NOT NULL,
            folder TEXT NOT NULL,
            message_id TEXT,
            from_addr TEXT NOT NULL,
            to_addrs TEXT[] NOT NULL DEFAULT '{}',
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            html_body TEXT,
            is_read BOOLEAN NOT NULL DEFAULT false,
            received_at TIMESTAMPTZ NOT NULL,
            fetched_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ,
            UNIQUE (account_id, uid, folder)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS message_account_id_idx ON message(account_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS message_created_at_idx ON message(created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attachment (
            id UUID PRIMARY KEY,
            message_id UUID NOT NULL REFERENCES message(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size BIGINT NOT NULL,
            storage_url TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_fts (
            message_id UUID PRIMARY KEY REFERENCES message(id) ON DELETE CASCADE,
            lexemes TSVECTOR NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_token (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            hash TEXT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            revoked BOOLEAN NOT NULL DEFAULT false,
            replaced_by UUID
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS refresh_token_user_id_idx ON refresh_token(user_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_job (
            id UUID PRIMARY KEY,
            queue TEXT NOT NULL,
            payload JSONB NOT NULL,
            state TEXT NOT NULL,
            attempt_count INT NOT NULL DEFAULT 0,
            backoff_until TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS sync_job_queue_state_idx ON sync_job(queue, state, backoff_until)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION email_fts_refresh() RETURNS trigger AS $$
        BEGIN
            INSERT INTO email_fts (message_id, lexemes)
            VALUES (NEW.id, to_tsvector('english',
                coalesce(NEW.subject, '') || ' ' || coalesce(NEW.body, '') || ' ' || coalesce(NEW.from_addr, '')))
            ON CONFLICT (message_id) DO UPDATE SET lexemes = EXCLUDED.lexemes;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("DROP TRIGGER IF EXISTS message_fts_update ON message")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER message_fts_update
        AFTER INSERT OR UPDATE ON message
        FOR EACH ROW EXECUTE FUNCTION email_fts_refresh()
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
