use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::errors::ParseError;
use crate::models::MatchStatus;
use crate::utils::{external_match_id, normalize_path};

/// Path segments that never lead to a match page.
const EXCLUDED_SEGMENTS: &[&str] = &["/news/", "/event/", "/rankings/", "/forum/", "/player/", "/team/"];
const MIN_ID_DIGITS: usize = 5;

/// One candidate match found on an event listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    /// Normalised source path, e.g. `/598939/fnatic-vs-navi`.
    pub url: String,
    pub external_id: String,
    /// Hint from the listing badge. Never trusted as ground truth.
    pub preliminary_status: MatchStatus,
}

/// Candidate match links in listing order, deduplicated by normalised path.
pub fn parse_event_listing(html: &str) -> Result<Vec<ListingEntry>, ParseError> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").map_err(|_| ParseError::Selector("a[href]".into()))?;
    let live_sel = Selector::parse(".ml-status").map_err(|_| ParseError::Selector(".ml-status".into()))?;
    let eta_sel = Selector::parse(".ml-eta").map_err(|_| ParseError::Selector(".ml-eta".into()))?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for link in doc.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let path = normalize_path(href);
        if EXCLUDED_SEGMENTS.iter().any(|seg| path.contains(seg)) {
            continue;
        }
        let Some(external_id) = external_match_id(&path) else {
            continue;
        };
        if external_id.len() < MIN_ID_DIGITS || !seen.insert(path.clone()) {
            continue;
        }

        let badge = |s: &Selector| {
            link.select(s)
                .next()
                .map(|e| e.text().collect::<String>())
                .unwrap_or_default()
        };
        let preliminary_status = if badge(&live_sel).to_uppercase().contains("LIVE") {
            MatchStatus::Live
        } else if badge(&eta_sel).contains("ago") {
            MatchStatus::Completed
        } else {
            MatchStatus::Upcoming
        };

        entries.push(ListingEntry { url: path, external_id, preliminary_status });
    }

    tracing::debug!(
        "Listing parsed: {} matches ({} live, {} completed)",
        entries.len(),
        entries.iter().filter(|e| e.preliminary_status == MatchStatus::Live).count(),
        entries.iter().filter(|e| e.preliminary_status == MatchStatus::Completed).count()
    );
    Ok(entries)
}
