//! Builds search-engine query URLs and retrieves result pages.

use crate::error::{AppError, Result};
use crate::models::Campaign;
use reqwest::Client;

pub(crate) const SEARCH_ENDPOINT: &str = "https://www.google.com/search";

/// The search backend paginates results five at a time.
pub(crate) const RESULTS_PER_PAGE: u32 = 5;

/// Composes the query URL for one result page: the quoted AND of site, query,
/// location and platform, offset by `page * 5`.
pub(crate) fn build_search_url(campaign: &Campaign, page: u32) -> String {
    let terms = format!(
        "\"{}\" \"{}\" \"{}\" \"{}\"",
        campaign.site, campaign.query, campaign.location, campaign.platform
    );
    let start = page * RESULTS_PER_PAGE;
    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("q", &terms)
        .append_pair("start", &start.to_string())
        .finish();
    format!("{}?{}", SEARCH_ENDPOINT, params)
}

/// Fetches one result page. Any non-success status is a hard failure for the
/// page; there is no retry or backoff.
pub(crate) async fn fetch_page(client: &Client, page_url: &str) -> Result<String> {
    tracing::debug!(target: "search", "GET {}", page_url);
    let response = client.get(page_url).send().await?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(target: "search", "Search page {} answered {}", page_url, status);
        return Err(AppError::UpstreamStatus(status));
    }

    Ok(response.text().await?)
}
