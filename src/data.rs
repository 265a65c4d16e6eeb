use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;

use crate::book::BookRecord;
use crate::catalog;

pub trait SectionService: Send + Sync {
    fn section(&self, name: &str, limit: usize) -> Result<Vec<BookRecord>>;
}

pub trait SearchService: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<BookRecord>>;
}

pub trait RelatedService: Send + Sync {
    fn related(&self, title: &str, author: &str) -> Result<Vec<BookRecord>>;
}

pub struct CatalogSectionService {
    client: Arc<catalog::Client>,
}

impl CatalogSectionService {
    pub fn new(client: Arc<catalog::Client>) -> Self {
        Self { client }
    }
}

impl SectionService for CatalogSectionService {
    fn section(&self, name: &str, limit: usize) -> Result<Vec<BookRecord>> {
        self.client
            .section(name, limit)
            .with_context(|| format!("fetch section {name}"))
    }
}

pub struct CatalogSearchService {
    client: Arc<catalog::Client>,
}

impl CatalogSearchService {
    pub fn new(client: Arc<catalog::Client>) -> Self {
        Self { client }
    }
}

impl SearchService for CatalogSearchService {
    fn search(&self, query: &str) -> Result<Vec<BookRecord>> {
        self.client.search(query).context("search catalog")
    }
}

pub struct CatalogRelatedService {
    client: Arc<catalog::Client>,
}

impl CatalogRelatedService {
    pub fn new(client: Arc<catalog::Client>) -> Self {
        Self { client }
    }
}

impl RelatedService for CatalogRelatedService {
    fn related(&self, title: &str, author: &str) -> Result<Vec<BookRecord>> {
        self.client
            .related(title, author)
            .with_context(|| format!("fetch related items for {title}"))
    }
}

#[derive(Default)]
pub struct MockSectionService {
    responses: Mutex<HashMap<String, Vec<BookRecord>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl MockSectionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self, name: &str, records: Vec<BookRecord>) {
        self.responses.lock().insert(name.to_string(), records);
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().clone()
    }
}

impl SectionService for MockSectionService {
    fn section(&self, name: &str, _limit: usize) -> Result<Vec<BookRecord>> {
        self.calls.lock().push((name.to_string(), Instant::now()));
        if self.failing.lock().contains(name) {
            bail!("mock section {name} unavailable");
        }
        Ok(self
            .responses
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| vec![mock_record(&format!("{name}-1"), name)]))
    }
}

#[derive(Default)]
pub struct MockSearchService {
    responses: Mutex<HashMap<String, Vec<BookRecord>>>,
    delay: Mutex<Duration>,
    fail: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl MockSearchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self, query: &str, records: Vec<BookRecord>) {
        self.responses.lock().insert(query.to_string(), records);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_next(&self) {
        *self.fail.lock() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl SearchService for MockSearchService {
    fn search(&self, query: &str) -> Result<Vec<BookRecord>> {
        self.calls.lock().push(query.to_string());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if std::mem::take(&mut *self.fail.lock()) {
            bail!("mock search failure");
        }
        Ok(self
            .responses
            .lock()
            .get(query)
            .cloned()
            .unwrap_or_else(|| vec![mock_record("search-1", query)]))
    }
}

#[derive(Default)]
pub struct MockRelatedService {
    responses: Mutex<Vec<BookRecord>>,
    delay: Mutex<Duration>,
    fail: Mutex<bool>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockRelatedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self, records: Vec<BookRecord>) {
        *self.responses.lock() = records;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_next(&self) {
        *self.fail.lock() = true;
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl RelatedService for MockRelatedService {
    fn related(&self, title: &str, author: &str) -> Result<Vec<BookRecord>> {
        self.calls
            .lock()
            .push((title.to_string(), author.to_string()));
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if std::mem::take(&mut *self.fail.lock()) {
            bail!("mock related failure");
        }
        Ok(self.responses.lock().clone())
    }
}

pub fn mock_record(id: &str, title: &str) -> BookRecord {
    BookRecord {
        id: Some(id.to_string()),
        title: title.to_string(),
        author: "Bookdeck Sample".to_string(),
        cover: Some(format!("https://covers.invalid/{id}.jpg")),
        description: Some("Sample content provided for offline browsing.".to_string()),
        is_free: true,
        ..BookRecord::default()
    }
}
