//! Pulls contact strings out of raw search-result HTML.

use crate::models::ContactType;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b")
        .expect("Failed to compile email regex pattern. This should not happen.")
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Extracts the unique contact strings found in the visible text of a page.
///
/// Only text content is searched; addresses hidden in markup or attributes
/// are ignored. Emails are kept exactly as written in the page. Phone mode
/// treats the campaign's `site` parameter as a literal prefix (e.g. "+1")
/// followed by 4 to 13 digits.
///
/// Never fails: a page with no matches, or a phone prefix that does not form
/// a usable pattern, yields an empty set.
pub(crate) fn extract_contacts(
    html: &str,
    contact_type: ContactType,
    site: &str,
) -> HashSet<String> {
    let document = Html::parse_document(html);

    let mut text_content = String::new();
    if let Some(body_node) = document.select(&BODY_SELECTOR).next() {
        for text_fragment in body_node.text() {
            text_content.push_str(text_fragment.trim());
            text_content.push(' ');
        }
    } else {
        for text_fragment in document.root_element().text() {
            text_content.push_str(text_fragment.trim());
            text_content.push(' ');
        }
    }

    let mut contacts = HashSet::new();
    match contact_type {
        ContactType::Email => {
            for contact_match in EMAIL_REGEX.find_iter(&text_content) {
                contacts.insert(contact_match.as_str().to_string());
            }
        }
        ContactType::Phone => {
            let pattern = format!("{}[0-9]{{4,13}}", regex::escape(site));
            match Regex::new(&pattern) {
                Ok(phone_regex) => {
                    for contact_match in phone_regex.find_iter(&text_content) {
                        contacts.insert(contact_match.as_str().to_string());
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "extract", "Unusable phone prefix '{}': {}", site, e);
                }
            }
        }
    }

    contacts
}
