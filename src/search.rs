use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::warn;

use crate::data::SearchService;
use crate::links::{Card, LinkPolicy};
use crate::session::Event;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_MIN_QUERY_LEN: usize = 2;

struct ArmedQuery {
    text: String,
    deadline: Instant,
}

struct PendingSearch {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct SearchDebouncer {
    service: Arc<dyn SearchService>,
    events: Sender<Event>,
    policy: LinkPolicy,
    window: Duration,
    min_query_len: usize,
    next_request_id: u64,
    armed: Option<ArmedQuery>,
    inflight: Option<PendingSearch>,
}

impl SearchDebouncer {
    pub fn new(
        service: Arc<dyn SearchService>,
        events: Sender<Event>,
        policy: LinkPolicy,
        window: Duration,
        min_query_len: usize,
    ) -> Self {
        Self {
            service,
            events,
            policy,
            window,
            min_query_len,
            next_request_id: 1,
            armed: None,
            inflight: None,
        }
    }

    // Every keystroke lands here; only the last query of a settle period
    // ever reaches the network.
    pub fn on_query_change(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.min_query_len {
            self.armed = None;
            self.cancel_inflight();
            let _ = self.events.send(Event::SearchHint {
                message: format!(
                    "Keep typing to search (at least {} characters).",
                    self.min_query_len
                ),
            });
            return;
        }
        self.armed = Some(ArmedQuery {
            text: trimmed.to_string(),
            deadline: Instant::now() + self.window,
        });
    }

    // Driven by the host loop; fires the armed query once it has settled.
    pub fn tick(&mut self) {
        let settled = self
            .armed
            .as_ref()
            .map(|armed| Instant::now() >= armed.deadline)
            .unwrap_or(false);
        if !settled {
            return;
        }
        if let Some(armed) = self.armed.take() {
            self.fire(armed.text);
        }
    }

    pub fn is_current(&self, request_id: u64) -> bool {
        self.inflight
            .as_ref()
            .map(|pending| pending.request_id == request_id)
            .unwrap_or(false)
    }

    // The next wall-clock moment tick() has work to do, for hosts that
    // want to sleep precisely instead of polling.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|armed| armed.deadline)
    }

    fn fire(&mut self, query: String) {
        self.cancel_inflight();

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.inflight = Some(PendingSearch {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });

        let service = self.service.clone();
        let tx = self.events.clone();
        let policy = self.policy.clone();
        thread::spawn(move || {
            let result = service
                .search(&query)
                .map(|records| {
                    records
                        .into_iter()
                        .filter(|record| record.has_cover())
                        .map(|record| Card::build(record, &policy))
                        .collect::<Vec<_>>()
                })
                .map_err(|err| {
                    warn!(query = %query, error = %err, "search failed");
                    format!("{err:#}")
                });
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Event::SearchResults {
                request_id,
                query,
                result,
            });
        });
    }

    fn cancel_inflight(&mut self) {
        if let Some(pending) = self.inflight.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}
