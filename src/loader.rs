use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::warn;

use crate::book::BookRecord;
use crate::data::SectionService;
use crate::links::{Card, LinkPolicy};
use crate::session::Event;

pub const DEFAULT_SECTION_PACING: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SectionRequest {
    pub name: String,
    pub slot: String,
    pub limit: usize,
}

impl SectionRequest {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, slot: S, limit: usize) -> Self {
        Self {
            name: name.into(),
            slot: slot.into(),
            limit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SectionOutcome {
    Loaded(Vec<Card>),
    // Retrieval worked but every record was filtered out; the slot should
    // show its empty state instead of rendering nothing.
    Empty,
    Failed(String),
}

struct PendingBatch {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct SectionLoader {
    service: Arc<dyn SectionService>,
    events: Sender<Event>,
    policy: LinkPolicy,
    pacing: Duration,
    next_request_id: u64,
    pending: Option<PendingBatch>,
}

impl SectionLoader {
    pub fn new(
        service: Arc<dyn SectionService>,
        events: Sender<Event>,
        policy: LinkPolicy,
        pacing: Duration,
    ) -> Self {
        Self {
            service,
            events,
            policy,
            pacing,
            next_request_id: 1,
            pending: None,
        }
    }

    // Starts a fresh batch, superseding any batch still in flight. Sections
    // are fetched strictly in order with a pacing gap between issuances so
    // the catalog backend is never burst.
    pub fn load(&mut self, batch: Vec<SectionRequest>) -> u64 {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingBatch {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });

        let service = self.service.clone();
        let tx = self.events.clone();
        let policy = self.policy.clone();
        let pacing = self.pacing;
        thread::spawn(move || {
            for (index, request) in batch.into_iter().enumerate() {
                if index > 0 {
                    thread::sleep(pacing);
                }
                if cancel_flag.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = match service.section(&request.name, request.limit) {
                    Ok(records) => build_outcome(records, &policy),
                    Err(err) => {
                        warn!(section = %request.name, error = %err, "section fetch failed");
                        SectionOutcome::Failed(format!("{err:#}"))
                    }
                };
                if cancel_flag.load(Ordering::SeqCst) {
                    return;
                }
                let _ = tx.send(Event::Section {
                    request_id,
                    slot: request.slot,
                    name: request.name,
                    outcome,
                });
            }
        });

        request_id
    }

    pub fn is_current(&self, request_id: u64) -> bool {
        self.pending
            .as_ref()
            .map(|pending| pending.request_id == request_id)
            .unwrap_or(false)
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}

fn build_outcome(records: Vec<BookRecord>, policy: &LinkPolicy) -> SectionOutcome {
    let mut seen = HashSet::new();
    let mut cards = Vec::new();
    for record in records {
        if !record.has_cover() {
            continue;
        }
        if let Some(id) = record.id.as_deref() {
            if !seen.insert(id.to_string()) {
                continue;
            }
        }
        let card = Card::build(record, policy);
        if card.availability.is_unavailable {
            continue;
        }
        cards.push(card);
    }
    if cards.is_empty() {
        SectionOutcome::Empty
    } else {
        SectionOutcome::Loaded(cards)
    }
}
