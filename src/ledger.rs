//! Core reconciliation logic between the pending and dispatched contact ledgers.

use crate::error::Result;
use crate::models::{
    Campaign, CampaignSeed, DispatchedContact, DrainReport, MailContent, PendingContact,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Persistence seam for the two contact ledgers.
pub(crate) trait Ledger {
    /// Reads up to `limit` pending contacts in insertion order.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingContact>>;

    /// Deletes one pending row by id.
    async fn remove_pending(&self, id: i64) -> Result<()>;

    /// Bulk-inserts one pending row per contact string, all sharing the
    /// campaign's descriptive fields. Returns the stored rows with their ids.
    async fn enqueue_pending(
        &self,
        campaign: &Campaign,
        emails: &[String],
    ) -> Result<Vec<PendingContact>>;

    /// Returns the subset of `emails` already present in the dispatched ledger.
    async fn already_dispatched(&self, emails: &[String]) -> Result<HashSet<String>>;

    /// Appends one row to the dispatched ledger.
    async fn record_dispatched(&self, contact: &DispatchedContact) -> Result<()>;
}

/// Delivery seam; one templated message per call.
pub(crate) trait MailSender {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Fresh-contact seam; a full scrape pass for one campaign.
pub(crate) trait ContactSource {
    async fn harvest(&self, campaign: &Campaign) -> Result<HashSet<String>>;
}

/// Tunables for one reconciliation pass. Batch size and the backfill term
/// lists are configuration, not constants.
#[derive(Debug, Clone)]
pub(crate) struct ReconcilerSettings {
    /// Maximum number of contacts mailed per invocation.
    pub batch_size: usize,
    /// Business-category terms a backfill query is drawn from.
    pub backfill_queries: Vec<String>,
    /// Location terms a backfill query is drawn from.
    pub backfill_locations: Vec<String>,
}

/// Drains pending contacts into outgoing mail and backfills the queue from
/// fresh scraping when it runs dry.
///
/// Concurrent invocations share the ledger without locking: two passes can
/// read the same pending row before either removes it, and the dedup read can
/// go stale between the check and a later insert. That window is inherent to
/// the design; the dispatched ledger stays append-only so the worst case is a
/// duplicate send, never a lost record.
pub(crate) struct Reconciler<L, M, S> {
    ledger: L,
    mailer: M,
    source: S,
    settings: ReconcilerSettings,
}

impl<L, M, S> Reconciler<L, M, S>
where
    L: Ledger,
    M: MailSender,
    S: ContactSource,
{
    pub(crate) fn new(ledger: L, mailer: M, source: S, settings: ReconcilerSettings) -> Self {
        Self {
            ledger,
            mailer,
            source,
            settings,
        }
    }

    /// Mails up to `batch_size` contacts: first whatever the pending queue
    /// holds, then, if the queue could not cover the batch, contacts mined by
    /// a single backfill scrape over a randomly drawn query and location.
    ///
    /// Returns every contact string scraped this pass (empty without a
    /// backfill) plus the contact strings actually mailed.
    pub(crate) async fn drain_and_dispatch(
        &self,
        seed: &CampaignSeed,
        mail: &MailContent,
    ) -> Result<DrainReport> {
        let batch_size = self.settings.batch_size;
        let batch = self.ledger.fetch_pending(batch_size).await?;
        tracing::info!(target: "dispatch", "Draining {} pending contacts", batch.len());

        let emails: Vec<String> = batch.iter().map(|c| c.email.clone()).collect();
        let dispatched = self.ledger.already_dispatched(&emails).await?;

        let mut sent: Vec<String> = Vec::new();
        for contact in &batch {
            if dispatched.contains(&contact.email) {
                // Mailed on an earlier pass that never got to dequeue it.
                tracing::debug!(target: "dispatch",
                    "Purging stale pending contact {}", contact.email
                );
                self.ledger.remove_pending(contact.id).await?;
                continue;
            }
            if sent.iter().any(|s| s == &contact.email) {
                // Duplicate row in this batch; the leftover gets purged as
                // stale on the next pass.
                continue;
            }
            if self.dispatch_one(contact, mail).await {
                sent.push(contact.email.clone());
            }
        }

        if sent.len() >= batch_size {
            return Ok(DrainReport {
                contacts: Vec::new(),
                sent,
                backfilled: false,
            });
        }

        // The queue could not cover the batch; mine fresh contacts once.
        let campaign = self.backfill_campaign(seed);
        tracing::info!(target: "dispatch",
            "Backfilling with query \"{}\" in \"{}\"", campaign.query, campaign.location
        );

        let scraped: Vec<String> = self.source.harvest(&campaign).await?.into_iter().collect();
        let dispatched = self.ledger.already_dispatched(&scraped).await?;
        let fresh: Vec<String> = scraped
            .iter()
            .filter(|email| !dispatched.contains(email.as_str()))
            .cloned()
            .collect();
        let queued = self.ledger.enqueue_pending(&campaign, &fresh).await?;
        tracing::info!(target: "dispatch",
            "Scraped {} contacts, {} newly queued", scraped.len(), queued.len()
        );

        let shortfall = batch_size - sent.len();
        for contact in queued.iter().take(shortfall) {
            if self.dispatch_one(contact, mail).await {
                sent.push(contact.email.clone());
            }
        }

        Ok(DrainReport {
            contacts: scraped,
            sent,
            backfilled: true,
        })
    }

    /// Sends one message, then records the dispatch, then dequeues the row.
    ///
    /// The dispatched record lands before the pending row is removed, so a
    /// crash in between leaves a duplicate that the next drain purges, never
    /// a contact missing from both ledgers. Per-contact failures are logged
    /// and swallowed; the pending row survives a failed delivery.
    async fn dispatch_one(&self, contact: &PendingContact, mail: &MailContent) -> bool {
        if let Err(e) = self
            .mailer
            .send_html(&contact.email, &mail.subject, &mail.html_template)
            .await
        {
            tracing::warn!(target: "dispatch",
                "Delivery to {} failed: {}", contact.email, e
            );
            return false;
        }

        let record = DispatchedContact::from_pending(contact, Utc::now());
        if let Err(e) = self.ledger.record_dispatched(&record).await {
            tracing::error!(target: "dispatch",
                "Delivered to {} but could not record the dispatch: {}", contact.email, e
            );
            return false;
        }
        if let Err(e) = self.ledger.remove_pending(contact.id).await {
            tracing::error!(target: "dispatch",
                "Could not dequeue {} after delivery: {}", contact.email, e
            );
        }
        true
    }

    fn backfill_campaign(&self, seed: &CampaignSeed) -> Campaign {
        let mut rng = rand::thread_rng();
        let query = self
            .settings
            .backfill_queries
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();
        let location = self
            .settings
            .backfill_locations
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();
        seed.with_terms(query, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::harvest::merge_extracted;
    use crate::models::ContactType;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Default)]
    struct FakeLedger {
        pending: Mutex<Vec<PendingContact>>,
        dispatched: Mutex<Vec<DispatchedContact>>,
        next_id: AtomicI64,
    }

    impl FakeLedger {
        fn row(&self, email: &str) -> PendingContact {
            PendingContact {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                query: "seeded".to_string(),
                location: "seeded".to_string(),
                platform: "seeded".to_string(),
                contact_type: ContactType::Email,
                site: "x.com".to_string(),
                email: email.to_string(),
            }
        }

        fn seed_pending(&self, emails: &[&str]) {
            let mut pending = self.pending.lock().unwrap();
            for email in emails {
                let row = self.row(email);
                pending.push(row);
            }
        }

        fn seed_dispatched(&self, emails: &[&str]) {
            let mut dispatched = self.dispatched.lock().unwrap();
            for email in emails {
                dispatched.push(DispatchedContact::from_pending(&self.row(email), Utc::now()));
            }
        }

        fn pending_emails(&self) -> Vec<String> {
            self.pending.lock().unwrap().iter().map(|c| c.email.clone()).collect()
        }

        fn dispatched_emails(&self) -> Vec<String> {
            self.dispatched.lock().unwrap().iter().map(|c| c.email.clone()).collect()
        }
    }

    impl Ledger for FakeLedger {
        async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingContact>> {
            Ok(self.pending.lock().unwrap().iter().take(limit).cloned().collect())
        }

        async fn remove_pending(&self, id: i64) -> Result<()> {
            self.pending.lock().unwrap().retain(|c| c.id != id);
            Ok(())
        }

        async fn enqueue_pending(
            &self,
            campaign: &Campaign,
            emails: &[String],
        ) -> Result<Vec<PendingContact>> {
            let mut queued = Vec::with_capacity(emails.len());
            let mut pending = self.pending.lock().unwrap();
            for email in emails {
                let contact = PendingContact {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                    query: campaign.query.clone(),
                    location: campaign.location.clone(),
                    platform: campaign.platform.clone(),
                    contact_type: campaign.contact_type,
                    site: campaign.site.clone(),
                    email: email.clone(),
                };
                pending.push(contact.clone());
                queued.push(contact);
            }
            Ok(queued)
        }

        async fn already_dispatched(&self, emails: &[String]) -> Result<HashSet<String>> {
            let dispatched = self.dispatched.lock().unwrap();
            Ok(emails
                .iter()
                .filter(|email| dispatched.iter().any(|c| &c.email == *email))
                .cloned()
                .collect())
        }

        async fn record_dispatched(&self, contact: &DispatchedContact) -> Result<()> {
            self.dispatched.lock().unwrap().push(contact.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<String>>,
        fail_for: Vec<String>,
    }

    impl MailSender for FakeMailer {
        async fn send_html(&self, to: &str, _subject: &str, _html: &str) -> Result<()> {
            if self.fail_for.iter().any(|email| email == to) {
                return Err(AppError::Task("simulated delivery failure".to_string()));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSource {
        pages: Vec<String>,
        campaigns: Mutex<Vec<Campaign>>,
        fail: bool,
    }

    impl FakeSource {
        fn with_pages(pages: Vec<String>) -> Self {
            Self {
                pages,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    impl ContactSource for FakeSource {
        async fn harvest(&self, campaign: &Campaign) -> Result<HashSet<String>> {
            self.campaigns.lock().unwrap().push(campaign.clone());
            if self.fail {
                return Err(AppError::Generic(anyhow::anyhow!("scrape blocked")));
            }
            Ok(merge_extracted(&self.pages, campaign.contact_type, &campaign.site))
        }
    }

    fn settings(batch_size: usize) -> ReconcilerSettings {
        ReconcilerSettings {
            batch_size,
            backfill_queries: vec!["Dentists".to_string()],
            backfill_locations: vec!["Chicago".to_string()],
        }
    }

    fn seed() -> CampaignSeed {
        CampaignSeed {
            platform: "LinkedIn".to_string(),
            contact_type: ContactType::Email,
            site: "x.com".to_string(),
        }
    }

    fn mail() -> MailContent {
        MailContent {
            subject: "hello".to_string(),
            html_template: "<p>hi</p>".to_string(),
        }
    }

    fn page(emails: &[&str]) -> String {
        format!("<html><body>{}</body></html>", emails.join(" "))
    }

    #[tokio::test]
    async fn test_batch_bound_on_long_queue() {
        let ledger = FakeLedger::default();
        let emails: Vec<String> = (0..1000).map(|i| format!("c{}@x.com", i)).collect();
        let email_refs: Vec<&str> = emails.iter().map(String::as_str).collect();
        ledger.seed_pending(&email_refs);

        let reconciler =
            Reconciler::new(ledger, FakeMailer::default(), FakeSource::default(), settings(5));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert_eq!(report.sent.len(), 5);
        assert!(!report.backfilled);
        assert!(report.contacts.is_empty());
        assert_eq!(reconciler.ledger.pending_emails().len(), 995);
        assert!(reconciler.source.campaigns.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_bound_on_short_queue_with_backfill() {
        let ledger = FakeLedger::default();
        ledger.seed_pending(&["a@x.com", "b@x.com", "c@x.com"]);

        let source = FakeSource::with_pages(vec![page(&[
            "d@x.com", "e@x.com", "f@x.com", "g@x.com", "h@x.com",
        ])]);
        let reconciler = Reconciler::new(ledger, FakeMailer::default(), source, settings(5));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert_eq!(report.sent.len(), 5);
        assert!(report.backfilled);
        assert_eq!(report.contacts.len(), 5);
        // Three drained plus two of the five fresh ones; the rest stay queued.
        assert_eq!(reconciler.ledger.pending_emails().len(), 3);
        assert_eq!(reconciler.ledger.dispatched_emails().len(), 5);
    }

    #[tokio::test]
    async fn test_empty_queue_zero_scrape() {
        let reconciler = Reconciler::new(
            FakeLedger::default(),
            FakeMailer::default(),
            FakeSource::with_pages(vec![page(&[])]),
            settings(5),
        );
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert!(report.sent.is_empty());
        assert!(report.backfilled);
        assert!(report.contacts.is_empty());
    }

    #[tokio::test]
    async fn test_dispatched_contacts_never_reenqueued() {
        let ledger = FakeLedger::default();
        ledger.seed_dispatched(&["a@x.com"]);

        let source = FakeSource::with_pages(vec![page(&["a@x.com", "b@x.com", "c@x.com"])]);
        let reconciler = Reconciler::new(ledger, FakeMailer::default(), source, settings(2));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert_eq!(report.contacts.len(), 3);
        assert_eq!(report.sent.len(), 2);
        assert!(!report.sent.contains(&"a@x.com".to_string()));
        assert!(!reconciler.ledger.pending_emails().contains(&"a@x.com".to_string()));
        assert_eq!(
            reconciler.ledger.dispatched_emails().iter().filter(|e| *e == "a@x.com").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_backfill_draws_terms_from_configured_lists() {
        let ledger = FakeLedger::default();
        ledger.seed_pending(&["a@x.com"]);

        let source = FakeSource::with_pages(vec![page(&[])]);
        let reconciler = Reconciler::new(ledger, FakeMailer::default(), source, settings(5));
        reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        let campaigns = reconciler.source.campaigns.lock().unwrap();
        assert_eq!(campaigns.len(), 1, "backfill must scrape exactly once");
        assert_eq!(campaigns[0].query, "Dentists");
        assert_eq!(campaigns[0].location, "Chicago");
        assert_eq!(campaigns[0].platform, "LinkedIn");
    }

    #[tokio::test]
    async fn test_stale_pending_rows_are_purged_not_mailed() {
        let ledger = FakeLedger::default();
        ledger.seed_pending(&["a@x.com"]);
        ledger.seed_dispatched(&["a@x.com"]);

        let source = FakeSource::with_pages(vec![page(&[])]);
        let reconciler = Reconciler::new(ledger, FakeMailer::default(), source, settings(5));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert!(report.sent.is_empty());
        assert!(reconciler.mailer.sent.lock().unwrap().is_empty());
        assert!(reconciler.ledger.pending_emails().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_contact_pending() {
        let ledger = FakeLedger::default();
        ledger.seed_pending(&["a@x.com"]);

        let mailer = FakeMailer {
            fail_for: vec!["a@x.com".to_string()],
            ..FakeMailer::default()
        };
        let source = FakeSource::with_pages(vec![page(&[])]);
        let reconciler = Reconciler::new(ledger, mailer, source, settings(1));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert!(report.sent.is_empty());
        assert!(report.backfilled);
        assert_eq!(reconciler.ledger.pending_emails(), vec!["a@x.com".to_string()]);
        assert!(reconciler.ledger.dispatched_emails().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_rows_in_batch_mail_once() {
        let ledger = FakeLedger::default();
        ledger.seed_pending(&["e@x.com", "e@x.com"]);

        let source = FakeSource::with_pages(vec![page(&[])]);
        let reconciler = Reconciler::new(ledger, FakeMailer::default(), source, settings(2));
        let report = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();

        assert_eq!(report.sent, vec!["e@x.com".to_string()]);
        assert_eq!(reconciler.mailer.sent.lock().unwrap().len(), 1);
        assert_eq!(reconciler.ledger.dispatched_emails().len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_failure_fails_the_pass() {
        let reconciler = Reconciler::new(
            FakeLedger::default(),
            FakeMailer::default(),
            FakeSource::failing(),
            settings(5),
        );
        let result = reconciler.drain_and_dispatch(&seed(), &mail()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_two_passes() {
        let html = page(&["a@x.com", "b@x.com", "c@x.com"]);
        let reconciler = Reconciler::new(
            FakeLedger::default(),
            FakeMailer::default(),
            FakeSource::with_pages(vec![html]),
            settings(2),
        );

        let first = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();
        assert!(first.backfilled);
        assert_eq!(first.contacts.len(), 3);
        assert_eq!(first.sent.len(), 2);
        assert_eq!(reconciler.ledger.pending_emails().len(), 1);
        assert_eq!(reconciler.ledger.dispatched_emails().len(), 2);

        // The second pass drains the leftover, then backfills for the
        // deficit; the rescrape is fully filtered by the updated sent ledger.
        let second = reconciler.drain_and_dispatch(&seed(), &mail()).await.unwrap();
        assert!(second.backfilled);
        assert_eq!(second.contacts.len(), 3);
        assert_eq!(second.sent.len(), 1);
        assert!(reconciler.ledger.pending_emails().is_empty());
        assert_eq!(reconciler.ledger.dispatched_emails().len(), 3);

        let mut mailed = reconciler.mailer.sent.lock().unwrap().clone();
        mailed.sort();
        assert_eq!(mailed, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }
}
