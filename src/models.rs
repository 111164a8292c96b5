//! Defines the core data structures used in the leadmine application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of contact string a campaign mines for.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ContactType {
    /// Email addresses found in result-page text.
    #[default]
    Email,
    /// Phone numbers prefixed by the campaign's `site` string.
    Phone,
}

impl ContactType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ContactType::Email => "email",
            ContactType::Phone => "phone",
        }
    }

    /// Lenient decoding for ledger rows; anything unrecognized counts as email.
    pub(crate) fn from_db(value: &str) -> Self {
        match value {
            "phone" => ContactType::Phone,
            _ => ContactType::Email,
        }
    }
}

/// The parameter bundle for one scrape pass: what to search for, where, and
/// which kind of contact string to pull out of the result pages.
#[derive(Debug, Clone)]
pub(crate) struct Campaign {
    /// Free-text search term, e.g. "marketing agencies".
    pub query: String,
    /// Free-text location, e.g. "New York".
    pub location: String,
    /// Platform label included in the quoted search, e.g. "LinkedIn".
    pub platform: String,
    pub contact_type: ContactType,
    /// Domain filter for email campaigns; doubles as the literal phone prefix
    /// (e.g. "+1") for phone campaigns.
    pub site: String,
}

/// The caller-fixed half of a campaign. Query and location are filled in per
/// backfill pass, drawn from the configured term lists.
#[derive(Debug, Clone)]
pub(crate) struct CampaignSeed {
    pub platform: String,
    pub contact_type: ContactType,
    pub site: String,
}

impl CampaignSeed {
    pub(crate) fn with_terms(&self, query: String, location: String) -> Campaign {
        Campaign {
            query,
            location,
            platform: self.platform.clone(),
            contact_type: self.contact_type,
            site: self.site.clone(),
        }
    }
}

/// A discovered contact waiting to be mailed. One row in the pending ledger.
///
/// The `email` field holds the contact string regardless of kind; phone
/// campaigns store phone numbers in it under the same column name.
#[derive(Debug, Clone)]
pub(crate) struct PendingContact {
    /// Store-assigned row id; ordering follows insertion.
    pub id: i64,
    pub query: String,
    pub location: String,
    pub platform: String,
    pub contact_type: ContactType,
    pub site: String,
    pub email: String,
}

/// A contact that was mailed. Append-only; the dedup oracle for every later
/// scrape pass and dispatch batch.
#[derive(Debug, Clone)]
pub(crate) struct DispatchedContact {
    pub query: String,
    pub location: String,
    pub platform: String,
    pub contact_type: ContactType,
    pub site: String,
    pub email: String,
    pub sent_at: DateTime<Utc>,
}

impl DispatchedContact {
    pub(crate) fn from_pending(contact: &PendingContact, sent_at: DateTime<Utc>) -> Self {
        Self {
            query: contact.query.clone(),
            location: contact.location.clone(),
            platform: contact.platform.clone(),
            contact_type: contact.contact_type,
            site: contact.site.clone(),
            email: contact.email.clone(),
            sent_at,
        }
    }
}

/// Subject line and HTML body used for every send in a dispatch batch.
#[derive(Debug, Clone)]
pub(crate) struct MailContent {
    pub subject: String,
    pub html_template: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DrainReport {
    /// Every contact string scraped this invocation; empty when the pending
    /// queue covered the batch and no backfill ran.
    pub contacts: Vec<String>,
    /// Contact strings actually mailed, at most `batch_size` of them.
    pub sent: Vec<String>,
    /// Whether a backfill scrape ran.
    pub backfilled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_type_db_round_trip() {
        assert_eq!(ContactType::from_db(ContactType::Email.as_str()), ContactType::Email);
        assert_eq!(ContactType::from_db(ContactType::Phone.as_str()), ContactType::Phone);
        assert_eq!(ContactType::from_db("fax"), ContactType::Email);
    }

    #[test]
    fn test_contact_type_wire_format() {
        assert_eq!(serde_json::to_string(&ContactType::Phone).unwrap(), "\"phone\"");
        let parsed: ContactType = serde_json::from_str("\"email\"").unwrap();
        assert_eq!(parsed, ContactType::Email);
    }

    #[test]
    fn test_campaign_seed_terms() {
        let seed = CampaignSeed {
            platform: "LinkedIn".to_string(),
            contact_type: ContactType::Email,
            site: "gmail.com".to_string(),
        };
        let campaign = seed.with_terms("Realtors".to_string(), "Chicago".to_string());
        assert_eq!(campaign.query, "Realtors");
        assert_eq!(campaign.location, "Chicago");
        assert_eq!(campaign.platform, "LinkedIn");
        assert_eq!(campaign.site, "gmail.com");
    }
}
