//! Postgres persistence for the pending and dispatched contact ledgers.

use crate::error::Result;
use crate::ledger::Ledger;
use crate::models::{Campaign, ContactType, DispatchedContact, PendingContact};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::collections::HashSet;

const CREATE_PENDING: &str = "\
CREATE TABLE IF NOT EXISTS pending_contacts (
    id BIGSERIAL PRIMARY KEY,
    query TEXT NOT NULL,
    location TEXT NOT NULL,
    platform TEXT NOT NULL,
    contact_type TEXT NOT NULL,
    site TEXT NOT NULL,
    email TEXT NOT NULL
)";

const CREATE_DISPATCHED: &str = "\
CREATE TABLE IF NOT EXISTS dispatched_contacts (
    id BIGSERIAL PRIMARY KEY,
    query TEXT NOT NULL,
    location TEXT NOT NULL,
    platform TEXT NOT NULL,
    contact_type TEXT NOT NULL,
    site TEXT NOT NULL,
    email TEXT NOT NULL,
    sent_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

// The dedup oracle is queried by email on every drain and every backfill.
const CREATE_DISPATCHED_EMAIL_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS dispatched_contacts_email_idx ON dispatched_contacts (email)";

/// Connection handle for the contact database, shared by clone.
///
/// There is deliberately no uniqueness constraint on `email` in either table;
/// dedup happens in the reconciler against the dispatched ledger.
#[derive(Debug, Clone)]
pub(crate) struct ContactStore {
    pool: PgPool,
}

impl ContactStore {
    /// Opens a connection pool against the configured database URL.
    pub(crate) async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        tracing::info!(target: "store", "Connected to the contact database");
        Ok(Self { pool })
    }

    /// Creates both ledger tables and their indexes if missing. Idempotent.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        for statement in [CREATE_PENDING, CREATE_DISPATCHED, CREATE_DISPATCHED_EMAIL_INDEX] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn pending_from_row(row: &PgRow) -> sqlx::Result<PendingContact> {
    Ok(PendingContact {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        location: row.try_get("location")?,
        platform: row.try_get("platform")?,
        contact_type: ContactType::from_db(row.try_get::<String, _>("contact_type")?.as_str()),
        site: row.try_get("site")?,
        email: row.try_get("email")?,
    })
}

impl Ledger for ContactStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingContact>> {
        let rows = sqlx::query(
            "SELECT id, query, location, platform, contact_type, site, email \
             FROM pending_contacts ORDER BY id LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(pending_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn remove_pending(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_contacts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue_pending(
        &self,
        campaign: &Campaign,
        emails: &[String],
    ) -> Result<Vec<PendingContact>> {
        let mut queued = Vec::with_capacity(emails.len());
        let mut tx = self.pool.begin().await?;
        for email in emails {
            let row = sqlx::query(
                "INSERT INTO pending_contacts \
                 (query, location, platform, contact_type, site, email) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(&campaign.query)
            .bind(&campaign.location)
            .bind(&campaign.platform)
            .bind(campaign.contact_type.as_str())
            .bind(&campaign.site)
            .bind(email)
            .fetch_one(&mut *tx)
            .await?;

            queued.push(PendingContact {
                id: row.try_get("id")?,
                query: campaign.query.clone(),
                location: campaign.location.clone(),
                platform: campaign.platform.clone(),
                contact_type: campaign.contact_type,
                site: campaign.site.clone(),
                email: email.clone(),
            });
        }
        tx.commit().await?;
        Ok(queued)
    }

    async fn already_dispatched(&self, emails: &[String]) -> Result<HashSet<String>> {
        if emails.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            "SELECT DISTINCT email FROM dispatched_contacts WHERE email = ANY($1)",
        )
        .bind(emails)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("email"))
            .collect::<sqlx::Result<HashSet<_>>>()
            .map_err(Into::into)
    }

    async fn record_dispatched(&self, contact: &DispatchedContact) -> Result<()> {
        sqlx::query(
            "INSERT INTO dispatched_contacts \
             (query, location, platform, contact_type, site, email, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&contact.query)
        .bind(&contact.location)
        .bind(&contact.platform)
        .bind(contact.contact_type.as_str())
        .bind(&contact.site)
        .bind(&contact.email)
        .bind(contact.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
