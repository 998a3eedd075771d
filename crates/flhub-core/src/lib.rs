//! Core domain model and keyword matching for Freelancer Hub.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "flhub-core";

/// A freelance job posting ingested from an external source. Owned by the
/// hosted store and immutable once created; this system only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub source_url: String,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A keyword row joined to its owning profile's email, as returned by the
/// store's full matching scan. `email` is `None` when the profile join does
/// not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub user_id: Uuid,
    pub term: String,
    pub email: Option<String>,
}

/// One user's slice of a notification run: where to send and what matched.
/// The opportunity list is deduplicated by id and keeps supply order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserDigest {
    pub email: String,
    pub opportunities: Vec<Opportunity>,
}

/// Per-run mapping from user to matched digest. Derived fresh each run,
/// never persisted.
pub type NotificationBatch = BTreeMap<Uuid, UserDigest>;

/// The one substring rule shared by the notification matcher and the feed
/// filter. Case-insensitive containment against title and description; a
/// missing description is an empty string, not a wildcard.
pub fn term_matches(term: &str, title: &str, description: Option<&str>) -> bool {
    let term = term.to_lowercase();
    let title = title.to_lowercase();
    let description = description.unwrap_or_default().to_lowercase();
    title.contains(&term) || description.contains(&term)
}

/// Cross-product scan deciding who gets notified with which opportunities.
///
/// Pure over its inputs: resolve ids and fetch keyword rows first, then call
/// this. Matched lists follow the order opportunities were supplied and are
/// deduplicated by opportunity id even when several of a user's terms hit the
/// same posting. Keyword rows without a resolvable email never produce an
/// entry. O(opportunities x keywords); acceptable while both sets stay small.
pub fn match_opportunities(
    opportunities: &[Opportunity],
    keywords: &[KeywordRecord],
) -> NotificationBatch {
    let mut batch = NotificationBatch::new();

    for opportunity in opportunities {
        for keyword in keywords {
            if !term_matches(
                &keyword.term,
                &opportunity.title,
                opportunity.description.as_deref(),
            ) {
                continue;
            }

            let Some(email) = &keyword.email else {
                debug!(
                    user_id = %keyword.user_id,
                    term = %keyword.term,
                    "keyword matched but profile email did not resolve, skipping"
                );
                continue;
            };

            let digest = batch.entry(keyword.user_id).or_insert_with(|| UserDigest {
                email: email.clone(),
                opportunities: Vec::new(),
            });
            if !digest.opportunities.iter().any(|o| o.id == opportunity.id) {
                digest.opportunities.push(opportunity.clone());
            }
        }
    }

    batch
}

/// Feed filter predicate: true when any of the user's terms matches. Calls
/// the same `term_matches` rule as the notification matcher, so feed
/// filtering and notification fan-out cannot diverge.
pub fn matches_keywords(opportunity: &Opportunity, terms: &[String]) -> bool {
    terms
        .iter()
        .any(|term| term_matches(term, &opportunity.title, opportunity.description.as_deref()))
}
