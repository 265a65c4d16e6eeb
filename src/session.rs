use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::catalog;
use crate::config::Config;
use crate::data::{
    CatalogRelatedService, CatalogSearchService, CatalogSectionService, RelatedService,
    SearchService, SectionService,
};
use crate::links::{Card, LinkPolicy, ResolvedLink};
use crate::loader::{SectionLoader, SectionOutcome};
use crate::preview::{PreviewSession, RelatedItem};
use crate::search::SearchDebouncer;
use crate::storage::{self, CollectionEvent, Store};

const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum Event {
    Section {
        request_id: u64,
        slot: String,
        name: String,
        outcome: SectionOutcome,
    },
    SearchResults {
        request_id: u64,
        query: String,
        result: Result<Vec<Card>, String>,
    },
    SearchHint {
        message: String,
    },
    Related {
        request_id: u64,
        result: Result<Vec<RelatedItem>, String>,
    },
    Collection(CollectionEvent),
    Notice {
        message: String,
    },
}

// Everything a session needs is injected here, once; components never
// reach for shared globals. Service slots default to the catalog-backed
// implementations when left empty.
#[derive(Default)]
pub struct SessionOptions {
    pub config: Config,
    pub store: Option<Arc<Store>>,
    pub section_service: Option<Arc<dyn SectionService>>,
    pub search_service: Option<Arc<dyn SearchService>>,
    pub related_service: Option<Arc<dyn RelatedService>>,
}

pub struct Session {
    config: Config,
    store: Arc<Store>,
    loader: SectionLoader,
    search: SearchDebouncer,
    preview: PreviewSession,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self> {
        let config = options.config;

        let store = match options.store {
            Some(store) => store,
            None => Arc::new(
                Store::open(storage::Options {
                    path: config.storage.path.clone(),
                })
                .context("open collection store")?,
            ),
        };

        let mut catalog_client: Option<Arc<catalog::Client>> = None;
        let mut client = || -> Result<Arc<catalog::Client>> {
            if let Some(client) = catalog_client.as_ref() {
                return Ok(client.clone());
            }
            let built = Arc::new(
                catalog::Client::new(catalog::ClientConfig {
                    user_agent: config.catalog.user_agent.clone(),
                    base_url: Some(config.catalog.base_url.clone()),
                    request_timeout: Some(config.catalog.request_timeout),
                    http_client: None,
                })
                .context("build catalog client")?,
            );
            catalog_client = Some(built.clone());
            Ok(built)
        };

        let section_service = match options.section_service {
            Some(service) => service,
            None => Arc::new(CatalogSectionService::new(client()?)),
        };
        let search_service = match options.search_service {
            Some(service) => service,
            None => Arc::new(CatalogSearchService::new(client()?)),
        };
        let related_service = match options.related_service {
            Some(service) => service,
            None => Arc::new(CatalogRelatedService::new(client()?)),
        };

        let (events_tx, events_rx) = unbounded();
        let policy = LinkPolicy {
            surface_preview: config.browse.surface_preview,
        };

        let loader = SectionLoader::new(
            section_service,
            events_tx.clone(),
            policy.clone(),
            config.browse.section_pacing,
        );
        let search = SearchDebouncer::new(
            search_service,
            events_tx.clone(),
            policy.clone(),
            config.browse.search_debounce,
            config.browse.min_query_len,
        );
        let preview = PreviewSession::new(related_service, store.clone(), events_tx.clone(), policy);

        // Bridge the store's change feed into the session channel so one
        // loop observes saves made anywhere in this process.
        let collection_rx = store.subscribe();
        let bridge_tx = events_tx.clone();
        thread::spawn(move || {
            for event in collection_rx.iter() {
                if bridge_tx.send(Event::Collection(event)).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            config,
            store,
            loader,
            search,
            preview,
            events_tx,
            events_rx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&mut self) -> &mut SectionLoader {
        &mut self.loader
    }

    pub fn search(&mut self) -> &mut SearchDebouncer {
        &mut self.search
    }

    pub fn preview(&mut self) -> &mut PreviewSession {
        &mut self.preview
    }

    pub fn collection(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            surface_preview: self.config.browse.surface_preview,
        }
    }

    // Drives timers; hosts with their own cadence may call this directly
    // instead of blocking in next_event.
    pub fn tick(&mut self) {
        self.search.tick();
    }

    // Blocks up to `timeout` for the next presentable event, ticking the
    // debounce timer while it waits. Stale section and search responses
    // are swallowed here so the host never sees superseded data.
    pub fn next_event(&mut self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = TICK_INTERVAL.min(deadline - now);
            match self.events_rx.recv_timeout(wait) {
                Ok(event) => {
                    if self.absorb(&event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.tick();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    if self.absorb(&event) {
                        return Some(event);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    fn absorb(&mut self, event: &Event) -> bool {
        match event {
            Event::Related { request_id, result } => {
                self.preview.handle_related(*request_id, result.clone());
                true
            }
            Event::SearchResults { request_id, .. } => self.search.is_current(*request_id),
            Event::Section { request_id, .. } => self.loader.is_current(*request_id),
            _ => true,
        }
    }

    // External opens can be blocked by the environment; that is a notice,
    // never a hard failure.
    pub fn open_external(&self, link: &ResolvedLink) -> bool {
        match webbrowser::open(&link.url) {
            Ok(_) => true,
            Err(err) => {
                let _ = self.events_tx.send(Event::Notice {
                    message: format!("Could not open {}: {err}", link.label),
                });
                false
            }
        }
    }
}
