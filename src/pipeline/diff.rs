//! Diff calculation for offer notifications.
//!
//! Compares the offers extracted in this run against the Seen-Set of the
//! previous run. The next Seen-Set is always the id set of the current page:
//! offers that disappear are forgotten, so an identical offer listed again
//! later is reported again.

use std::collections::HashSet;

use crate::models::Offer;

/// Seen-Set as loaded at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenState {
    /// No persisted state yet (first run or state removed)
    Uninitialized,
    /// Ids observed at the end of the last successful run
    Seen(HashSet<String>),
}

impl From<Option<Vec<String>>> for SeenState {
    fn from(ids: Option<Vec<String>>) -> Self {
        match ids {
            Some(ids) => Self::Seen(ids.into_iter().collect()),
            None => Self::Uninitialized,
        }
    }
}

impl SeenState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Seen(_))
    }
}

/// Outcome of comparing one run against the Seen-Set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Offers to announce, in document order
    pub to_notify: Vec<Offer>,
    /// Seen-Set to persist: ids of the current page in document order,
    /// without duplicates
    pub next_seen: Vec<String>,
}

impl DiffResult {
    pub fn has_new(&self) -> bool {
        !self.to_notify.is_empty()
    }
}

/// Compute the offers to announce and the next Seen-Set.
///
/// With no prior state nothing is announced, so pre-existing listings do not
/// flood subscribers on the first run.
pub fn calculate_diff(current: &[Offer], seen: &SeenState) -> DiffResult {
    let next_seen = ids_in_order(current);

    let to_notify = match seen {
        SeenState::Uninitialized => Vec::new(),
        SeenState::Seen(seen) => current
            .iter()
            .filter(|offer| !seen.contains(&offer.id))
            .cloned()
            .collect(),
    };

    DiffResult {
        to_notify,
        next_seen,
    }
}

fn ids_in_order(offers: &[Offer]) -> Vec<String> {
    let mut unique = HashSet::new();
    offers
        .iter()
        .filter(|offer| unique.insert(offer.id.as_str()))
        .map(|offer| offer.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_offer(n: u32) -> Offer {
        Offer::new(
            format!("Offer {n}"),
            "Dortmund",
            format!("https://example.com/offer/{n}"),
            "",
            "",
            "",
        )
    }

    fn seen(offers: &[Offer]) -> SeenState {
        SeenState::Seen(offers.iter().map(|o| o.id.clone()).collect())
    }

    #[test]
    fn test_first_run_is_suppressed() {
        let current = vec![make_offer(1), make_offer(2), make_offer(3)];
        let result = calculate_diff(&current, &SeenState::Uninitialized);

        assert!(!result.has_new());
        assert_eq!(result.next_seen, ids_in_order(&current));
        assert_eq!(result.next_seen.len(), 3);
    }

    #[test]
    fn test_additions_keep_document_order() {
        let previous = vec![make_offer(2)];
        let current = vec![make_offer(3), make_offer(2), make_offer(1)];

        let result = calculate_diff(&current, &seen(&previous));
        let titles: Vec<_> = result.to_notify.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["Offer 3", "Offer 1"]);
    }

    #[test]
    fn test_idempotent_second_pass() {
        let current = vec![make_offer(1), make_offer(2)];
        let first = calculate_diff(&current, &seen(&[make_offer(1)]));
        assert_eq!(first.to_notify.len(), 1);

        let state = SeenState::from(Some(first.next_seen));
        let second = calculate_diff(&current, &state);
        assert!(!second.has_new());
    }

    #[test]
    fn test_replace_not_union() {
        let a = make_offer(1);
        let b = make_offer(2);

        // Run N: A present
        let run_n = calculate_diff(&[a.clone(), b.clone()], &SeenState::Uninitialized);
        // Run N+1: A gone
        let run_n1 = calculate_diff(&[b.clone()], &SeenState::from(Some(run_n.next_seen)));
        assert!(!run_n1.has_new());
        assert_eq!(run_n1.next_seen, vec![b.id.clone()]);
        // Run N+2: A back, reported again
        let run_n2 = calculate_diff(&[a.clone(), b], &SeenState::from(Some(run_n1.next_seen)));
        assert_eq!(run_n2.to_notify, vec![a]);
    }

    #[test]
    fn test_empty_page_clears_seen() {
        let result = calculate_diff(&[], &seen(&[make_offer(1)]));
        assert!(!result.has_new());
        assert!(result.next_seen.is_empty());
    }

    #[test]
    fn test_duplicate_cards_collapse_in_next_seen() {
        let current = vec![make_offer(1), make_offer(1)];
        let result = calculate_diff(&current, &SeenState::Seen(HashSet::new()));

        assert_eq!(result.to_notify.len(), 2);
        assert_eq!(result.next_seen.len(), 1);
    }

    #[test]
    fn test_missing_state_maps_to_uninitialized() {
        assert_eq!(SeenState::from(None), SeenState::Uninitialized);
        assert!(SeenState::from(Some(Vec::new())).is_initialized());
    }
}
