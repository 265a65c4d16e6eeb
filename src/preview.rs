use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use tracing::warn;

use crate::book::BookRecord;
use crate::data::RelatedService;
use crate::links::{Card, LinkPolicy};
use crate::session::Event;
use crate::storage::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPhase {
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverArt {
    Url(String),
    // Fallback tile shown when the cover image fails to load.
    Monogram(String),
}

#[derive(Debug, Clone)]
pub struct PreviewDetails {
    pub title: String,
    pub author: String,
    pub cover: CoverArt,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub description: String,
}

impl PreviewDetails {
    fn from_record(record: &BookRecord) -> Self {
        let title = record.display_title().to_string();
        let cover = match record.cover.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => CoverArt::Url(url.to_string()),
            _ => CoverArt::Monogram(monogram(&title)),
        };
        Self {
            author: record.display_author().to_string(),
            cover,
            year: record.year(),
            genre: record.genre().map(str::to_string),
            description: record
                .description
                .clone()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "No description available.".to_string()),
            title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelatedItem {
    pub card: Card,
    pub openable: bool,
}

struct PendingRelated {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct OpenPreview {
    pub details: PreviewDetails,
    pub phase: PreviewPhase,
    pub related: Vec<RelatedItem>,
    pub related_error: Option<String>,
    card: Card,
    viewport: f64,
    pending: Option<PendingRelated>,
}

impl OpenPreview {
    pub fn card(&self) -> &Card {
        &self.card
    }
}

pub struct PreviewSession {
    service: Arc<dyn RelatedService>,
    store: Arc<Store>,
    events: Sender<Event>,
    policy: LinkPolicy,
    next_request_id: u64,
    open: Option<OpenPreview>,
}

impl PreviewSession {
    pub fn new(
        service: Arc<dyn RelatedService>,
        store: Arc<Store>,
        events: Sender<Event>,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            service,
            store,
            events,
            policy,
            next_request_id: 1,
            open: None,
        }
    }

    pub fn state(&self) -> Option<&OpenPreview> {
        self.open.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    // Selecting an unavailable card leaves the session idle and warns the
    // user instead of opening a dead preview.
    pub fn open(&mut self, card: Card, viewport: f64) -> bool {
        if card.availability.is_unavailable {
            let _ = self.events.send(Event::Notice {
                message: format!(
                    "\"{}\" is not available right now.",
                    card.record.display_title()
                ),
            });
            return false;
        }

        self.close();

        let details = PreviewDetails::from_record(&card.record);
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let title = card.record.display_title().to_string();
        let author = card.record.author.trim().to_string();
        let service = self.service.clone();
        let tx = self.events.clone();
        let policy = self.policy.clone();
        let flag = cancel_flag.clone();
        thread::spawn(move || {
            let result = service
                .related(&title, &author)
                .map(|records| {
                    records
                        .into_iter()
                        .filter(|record| record.has_cover())
                        .map(|record| {
                            let card = Card::build(record, &policy);
                            let openable = card.openable();
                            RelatedItem { card, openable }
                        })
                        .collect::<Vec<_>>()
                })
                .map_err(|err| {
                    warn!(title = %title, error = %err, "related fetch failed");
                    format!("{err:#}")
                });
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Event::Related { request_id, result });
        });

        self.open = Some(OpenPreview {
            details,
            phase: PreviewPhase::Loading,
            related: Vec::new(),
            related_error: None,
            card,
            viewport,
            pending: Some(PendingRelated {
                request_id,
                cancel_flag,
            }),
        });
        true
    }

    pub fn handle_related(&mut self, request_id: u64, result: Result<Vec<RelatedItem>, String>) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let current = open
            .pending
            .as_ref()
            .map(|pending| {
                pending.request_id == request_id && !pending.cancel_flag.load(Ordering::SeqCst)
            })
            .unwrap_or(false);
        if !current {
            return;
        }
        open.pending = None;
        open.phase = PreviewPhase::Ready;
        match result {
            Ok(items) => open.related = items,
            Err(message) => open.related_error = Some(message),
        }
    }

    // One close per call: Escape while idle is a no-op, so repeated
    // open/close cycles never stack handlers or double-fire.
    pub fn handle_escape(&mut self) -> Option<f64> {
        self.close()
    }

    pub fn close(&mut self) -> Option<f64> {
        let open = self.open.take()?;
        if let Some(pending) = open.pending {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        Some(open.viewport)
    }

    pub fn cover_failed(&mut self) {
        if let Some(open) = self.open.as_mut() {
            open.details.cover = CoverArt::Monogram(monogram(&open.details.title));
        }
    }

    // Saving never touches session state; the modal stays where it is.
    pub fn save(&mut self) -> bool {
        let Some(open) = self.open.as_ref() else {
            return false;
        };
        match self.store.add(&open.card.record) {
            Ok(outcome) => {
                let message = if outcome.added {
                    format!("Saved \"{}\" to your collection.", outcome.entry.title)
                } else {
                    format!("\"{}\" is already in your collection.", outcome.entry.title)
                };
                let _ = self.events.send(Event::Notice { message });
                outcome.added
            }
            Err(err) => {
                warn!(error = %err, "collection save failed");
                let _ = self.events.send(Event::Notice {
                    message: "Could not save to your collection.".to_string(),
                });
                false
            }
        }
    }
}

fn monogram(title: &str) -> String {
    let initials: String = title
        .split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .collect();
    if initials.is_empty() {
        "?".to_string()
    } else {
        initials.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{mock_record, MockRelatedService};
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Duration;

    fn session_with(
        service: Arc<MockRelatedService>,
    ) -> (PreviewSession, Arc<Store>, Receiver<Event>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = unbounded();
        let session = PreviewSession::new(service, store.clone(), tx, LinkPolicy::default());
        (session, store, rx)
    }

    fn card(id: &str, title: &str) -> Card {
        Card::build(mock_record(id, title), &LinkPolicy::default())
    }

    fn unavailable_card() -> Card {
        let mut record = mock_record("locked", "Locked Book");
        record.is_free = false;
        record.preview_link = None;
        Card::build(record, &LinkPolicy::default())
    }

    fn recv_related(rx: &Receiver<Event>) -> (u64, Result<Vec<RelatedItem>, String>) {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).expect("event") {
                Event::Related { request_id, result } => return (request_id, result),
                _ => continue,
            }
        }
    }

    #[test]
    fn opening_populates_details_and_loads_related() {
        let service = Arc::new(MockRelatedService::new());
        let mut related = mock_record("rel1", "Dune Messiah");
        related.is_free = false;
        related.preview_link = None;
        service.stub(vec![mock_record("rel0", "Dune"), related]);
        let (mut session, _store, rx) = session_with(service.clone());

        let mut record = mock_record("d1", "Dune");
        record.published_date = Some("1965-08-01".into());
        record.categories = vec!["Science Fiction".into()];
        assert!(session.open(Card::build(record, &LinkPolicy::default()), 120.0));

        let open = session.state().expect("open");
        assert_eq!(open.phase, PreviewPhase::Loading);
        assert_eq!(open.details.year, Some(1965));
        assert_eq!(open.details.genre.as_deref(), Some("Science Fiction"));

        let (request_id, result) = recv_related(&rx);
        session.handle_related(request_id, result);

        let open = session.state().expect("open");
        assert_eq!(open.phase, PreviewPhase::Ready);
        assert_eq!(open.related.len(), 2);
        assert!(open.related[0].openable);
        assert!(!open.related[1].openable);
        assert_eq!(
            service.calls(),
            [("Dune".to_string(), "Bookdeck Sample".to_string())]
        );
    }

    #[test]
    fn unavailable_selection_stays_idle_with_warning() {
        let service = Arc::new(MockRelatedService::new());
        let (mut session, _store, rx) = session_with(service);

        assert!(!session.open(unavailable_card(), 0.0));
        assert!(!session.is_open());
        match rx.recv_timeout(Duration::from_millis(200)).expect("event") {
            Event::Notice { message } => assert!(message.contains("not available")),
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[test]
    fn escape_closes_exactly_once_per_press() {
        let service = Arc::new(MockRelatedService::new());
        let (mut session, _store, _rx) = session_with(service);

        assert!(session.open(card("d1", "Dune"), 42.0));
        assert_eq!(session.handle_escape(), Some(42.0));
        assert_eq!(session.handle_escape(), None);

        assert!(session.open(card("d2", "Foundation"), 7.0));
        assert_eq!(session.handle_escape(), Some(7.0));
        assert_eq!(session.handle_escape(), None);
    }

    #[test]
    fn stale_related_response_is_ignored() {
        let service = Arc::new(MockRelatedService::new());
        let (mut session, _store, rx) = session_with(service);

        session.open(card("d1", "Dune"), 0.0);
        let (first_id, first_result) = recv_related(&rx);

        session.open(card("d2", "Foundation"), 0.0);
        session.handle_related(first_id, first_result);
        let open = session.state().expect("open");
        assert_eq!(open.phase, PreviewPhase::Loading);

        let (second_id, second_result) = recv_related(&rx);
        session.handle_related(second_id, second_result);
        assert_eq!(session.state().expect("open").phase, PreviewPhase::Ready);
    }

    #[test]
    fn related_failure_is_scoped_to_the_panel() {
        let service = Arc::new(MockRelatedService::new());
        service.fail_next();
        let (mut session, _store, rx) = session_with(service);

        session.open(card("d1", "Dune"), 0.0);
        let (request_id, result) = recv_related(&rx);
        session.handle_related(request_id, result);

        let open = session.state().expect("still open");
        assert_eq!(open.phase, PreviewPhase::Ready);
        assert!(open.related_error.is_some());
        assert!(open.related.is_empty());
    }

    #[test]
    fn save_persists_without_closing() {
        let service = Arc::new(MockRelatedService::new());
        let (mut session, store, _rx) = session_with(service);

        session.open(card("d1", "Dune"), 0.0);
        assert!(session.save());
        assert!(session.is_open());
        assert!(!session.save());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn cover_failure_swaps_in_monogram() {
        let service = Arc::new(MockRelatedService::new());
        let (mut session, _store, _rx) = session_with(service);

        session.open(card("d1", "Dune Messiah"), 0.0);
        session.cover_failed();
        match &session.state().expect("open").details.cover {
            CoverArt::Monogram(initials) => assert_eq!(initials, "DM"),
            other => panic!("expected monogram, got {other:?}"),
        }
    }
}
