use std::time::Duration;

use crate::types::{Contact, SearchSnapshot, SearchStatus};

/// Quiet period after the last keystroke before a query is issued.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Query scheduled to run once its quiet period elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub token: u64,
    pub query: String,
    pub delay: Duration,
}

/// What the caller must do after an input change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAction {
    /// Input was blank; results were cleared and nothing is scheduled.
    Cleared,
    /// Cancel any pending timer and schedule this request instead.
    Scheduled(SearchRequest),
}

/// Debounced contact search for the new-chat dialog.
///
/// Every input change, open and close bumps a token. Timer expirations and
/// responses carrying an older token are ignored.
#[derive(Debug, Clone)]
pub struct ContactSearch {
    open: bool,
    query: String,
    status: SearchStatus,
    contacts: Vec<Contact>,
    error: Option<String>,
    token: u64,
    quiet_period: Duration,
}

impl Default for ContactSearch {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}

impl ContactSearch {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            open: false,
            query: String::new(),
            status: SearchStatus::Idle,
            contacts: Vec::new(),
            error: None,
            token: 0,
            quiet_period,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn status(&self) -> SearchStatus {
        self.status
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Open the dialog from a clean slate.
    pub fn open(&mut self) {
        self.reset();
        self.open = true;
    }

    /// Close the dialog, discarding results and anything in flight.
    pub fn close(&mut self) {
        self.reset();
        self.open = false;
    }

    /// Record new input. Typing into a closed dialog opens it.
    pub fn on_input(&mut self, text: &str) -> SearchAction {
        self.open = true;
        self.token += 1;
        self.query = text.to_owned();

        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.status = SearchStatus::Idle;
            self.contacts.clear();
            self.error = None;
            return SearchAction::Cleared;
        }

        self.status = SearchStatus::Searching;
        SearchAction::Scheduled(SearchRequest {
            token: self.token,
            query: trimmed.to_owned(),
            delay: self.quiet_period,
        })
    }

    /// Query to issue when the timer for `token` fires, if it is still current.
    pub fn due(&self, token: u64) -> Option<String> {
        if token != self.token || self.status != SearchStatus::Searching {
            return None;
        }
        Some(self.query.trim().to_owned())
    }

    /// Apply a search response. Returns `false` when `token` is stale.
    pub fn finish(&mut self, token: u64, result: Result<Vec<Contact>, String>) -> bool {
        if token != self.token || self.status != SearchStatus::Searching {
            return false;
        }

        match result {
            Ok(contacts) => {
                self.status = if contacts.is_empty() {
                    SearchStatus::NoContacts
                } else {
                    SearchStatus::Results
                };
                self.contacts = contacts;
                self.error = None;
            }
            Err(message) => {
                self.status = SearchStatus::Failed;
                self.contacts.clear();
                self.error = Some(message);
            }
        }
        true
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            open: self.open,
            query: self.query.clone(),
            status: self.status,
            contacts: self.contacts.clone(),
            error: self.error.clone(),
        }
    }

    fn reset(&mut self) {
        self.token += 1;
        self.query.clear();
        self.status = SearchStatus::Idle;
        self.contacts.clear();
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: &str) -> Contact {
        Contact {
            id: id.to_owned(),
            display_name: id.to_uppercase(),
            email: format!("{id}@example.org"),
        }
    }

    fn scheduled(action: SearchAction) -> SearchRequest {
        match action {
            SearchAction::Scheduled(request) => request,
            other => panic!("expected a scheduled request, got {other:?}"),
        }
    }

    #[test]
    fn only_latest_input_is_due() {
        let mut search = ContactSearch::default();
        search.open();

        let first = scheduled(search.on_input("al"));
        let second = scheduled(search.on_input("alex"));

        assert_eq!(second.delay, DEFAULT_QUIET_PERIOD);
        assert_eq!(search.due(first.token), None);
        assert_eq!(search.due(second.token).as_deref(), Some("alex"));
    }

    #[test]
    fn blank_input_clears_without_scheduling() {
        let mut search = ContactSearch::default();
        let request = scheduled(search.on_input("bob"));
        search.finish(request.token, Err("Failed to search contacts".into()));

        assert_eq!(search.on_input("   "), SearchAction::Cleared);
        let snapshot = search.snapshot();
        assert_eq!(snapshot.status, SearchStatus::Idle);
        assert_eq!(snapshot.error, None);
        assert!(snapshot.contacts.is_empty());
    }

    #[test]
    fn query_is_trimmed() {
        let mut search = ContactSearch::default();
        let request = scheduled(search.on_input("  bob@example.org "));
        assert_eq!(request.query, "bob@example.org");
    }

    #[test]
    fn zero_results_is_no_contacts_not_error() {
        let mut search = ContactSearch::default();
        let request = scheduled(search.on_input("nobody"));

        assert!(search.finish(request.token, Ok(Vec::new())));
        let snapshot = search.snapshot();
        assert_eq!(snapshot.status, SearchStatus::NoContacts);
        assert_eq!(snapshot.error, None);
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut search = ContactSearch::default();
        let stale = scheduled(search.on_input("bo"));
        let current = scheduled(search.on_input("bob"));

        assert!(!search.finish(stale.token, Ok(vec![contact("bo")])));
        assert_eq!(search.status(), SearchStatus::Searching);

        assert!(search.finish(current.token, Ok(vec![contact("bob")])));
        assert_eq!(search.contacts()[0].id, "bob");
        assert_eq!(search.status(), SearchStatus::Results);
    }

    #[test]
    fn failure_clears_results_and_sets_error() {
        let mut search = ContactSearch::default();
        let first = scheduled(search.on_input("bob"));
        search.finish(first.token, Ok(vec![contact("bob")]));

        let second = scheduled(search.on_input("bobby"));
        search.finish(second.token, Err("Failed to search contacts".into()));
        let snapshot = search.snapshot();
        assert_eq!(snapshot.status, SearchStatus::Failed);
        assert!(snapshot.contacts.is_empty());
        assert_eq!(snapshot.error.as_deref(), Some("Failed to search contacts"));
    }

    #[test]
    fn closing_invalidates_in_flight_query() {
        let mut search = ContactSearch::default();
        search.open();
        let request = scheduled(search.on_input("bob"));
        search.close();

        assert!(!search.is_open());
        assert_eq!(search.due(request.token), None);
        assert!(!search.finish(request.token, Ok(vec![contact("bob")])));
        assert!(search.contacts().is_empty());
    }
}
