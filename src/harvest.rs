//! Fans page fetches out across a result set and merges the extracted contacts.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::extract::extract_contacts;
use crate::ledger::ContactSource;
use crate::models::{Campaign, ContactType};
use crate::search::{build_search_url, fetch_page};
use futures::future;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Mines a whole result set for one campaign: every page fetched through a
/// shared HTTP client, in-flight requests bounded by a semaphore.
#[derive(Debug, Clone)]
pub(crate) struct SearchScraper {
    http_client: Client,
    pages_per_harvest: u32,
    fetch_concurrency: usize,
}

impl SearchScraper {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            pages_per_harvest: config.pages_per_harvest,
            fetch_concurrency: config.fetch_concurrency,
        })
    }

    /// Fetches every result page for the campaign and unions the contacts
    /// found on each into one deduplicated set.
    ///
    /// All-or-nothing: if any single page fetch fails, the whole harvest
    /// fails and no partial set is returned.
    pub(crate) async fn harvest(&self, campaign: &Campaign) -> Result<HashSet<String>> {
        tracing::info!(target: "harvest",
            "Harvesting {} pages for \"{}\" / \"{}\" on {}",
            self.pages_per_harvest, campaign.query, campaign.location, campaign.platform
        );

        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let fetches = (0..self.pages_per_harvest).map(|page| {
            let semaphore = Arc::clone(&semaphore);
            let page_url = build_search_url(campaign, page);
            let client = &self.http_client;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| AppError::Task(e.to_string()))?;
                fetch_page(client, &page_url).await
            }
        });

        let pages = future::try_join_all(fetches).await?;
        let contacts = merge_extracted(&pages, campaign.contact_type, &campaign.site);

        tracing::info!(target: "harvest",
            "Found {} unique contacts across {} pages",
            contacts.len(), pages.len()
        );
        Ok(contacts)
    }
}

impl ContactSource for SearchScraper {
    async fn harvest(&self, campaign: &Campaign) -> Result<HashSet<String>> {
        SearchScraper::harvest(self, campaign).await
    }
}

/// Runs the extractor over each page and unions the results.
pub(crate) fn merge_extracted(
    pages: &[String],
    contact_type: ContactType,
    site: &str,
) -> HashSet<String> {
    let mut contacts = HashSet::new();
    for html in pages {
        contacts.extend(extract_contacts(html, contact_type, site));
    }
    contacts
}
