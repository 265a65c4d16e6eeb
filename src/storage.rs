use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::book::BookRecord;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    subscribers: Arc<Mutex<Vec<Sender<CollectionEvent>>>>,
}

#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub cover: Option<String>,
    pub buy_link: Option<String>,
    pub info_link: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CollectionEvent {
    Added(CollectionEntry),
    Removed(String),
}

#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub added: bool,
    pub entry: CollectionEntry,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ProfileFields {
    pub bio: String,
    pub location: String,
    pub website: String,
    pub social: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(error = %err, "storage: could not create data directory");
            }
        }

        match open_at(&path) {
            Ok(conn) => Ok(Self::from_connection(conn)),
            Err(err) => {
                // A broken database must read as an empty collection, not
                // take the session down with it.
                warn!(error = %err, path = %path.display(), "storage: database unusable, starting empty");
                Self::open_in_memory()
            }
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add(&self, record: &BookRecord) -> Result<AddOutcome> {
        let title_key = normalize_key(&record.title);
        let author_key = normalize_key(&record.author);
        let real_id = record
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let id = real_id
            .map(str::to_string)
            .unwrap_or_else(|| synthesized_id(&title_key, &author_key));

        let entry = {
            let conn = self.conn.lock();
            let existing = if real_id.is_some() {
                lookup_by_id(&conn, &id)?
            } else {
                // Synthesized identity: two differently-synthesized ids for
                // the same normalized title+author are still one entry.
                match lookup_by_id(&conn, &id)? {
                    Some(entry) => Some(entry),
                    None => lookup_by_keys(&conn, &title_key, &author_key)?,
                }
            };
            if let Some(entry) = existing {
                return Ok(AddOutcome {
                    added: false,
                    entry,
                });
            }

            let entry = CollectionEntry {
                id,
                title: record.display_title().to_string(),
                author: record.display_author().to_string(),
                cover: record.cover.clone(),
                buy_link: record.buy_link.clone(),
                info_link: record.info_link.clone(),
                added_at: Utc::now(),
            };
            conn.execute(
                r#"
INSERT INTO collection_entries (id, title, author, title_key, author_key, cover, buy_link, info_link, added_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
                params![
                    entry.id,
                    entry.title,
                    entry.author,
                    title_key,
                    author_key,
                    entry.cover,
                    entry.buy_link,
                    entry.info_link,
                    entry.added_at.timestamp(),
                ],
            )
            .context("storage: insert collection entry")?;
            entry
        };

        self.notify(CollectionEvent::Added(entry.clone()));
        Ok(AddOutcome { added: true, entry })
    }

    pub fn list(&self) -> Result<Vec<CollectionEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, title, author, cover, buy_link, info_link, added_at
FROM collection_entries
ORDER BY added_at DESC, rowid DESC
"#,
        )?;
        let rows = stmt
            .query_map([], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM collection_entries WHERE id = ?1", params![id])
                .context("storage: delete collection entry")?
        };
        if removed > 0 {
            self.notify(CollectionEvent::Removed(id.to_string()));
        }
        Ok(removed > 0)
    }

    // Same-process change feed; the writer never sees its own cross-tab
    // storage notification, so interested views subscribe here instead.
    pub fn subscribe(&self) -> Receiver<CollectionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn profile(&self) -> Result<ProfileFields> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM profile WHERE key = 'profile'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("storage: query profile")?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(ProfileFields::default()),
        }
    }

    pub fn set_profile(&self, fields: &ProfileFields) -> Result<()> {
        let value = serde_json::to_string(fields).context("storage: encode profile")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO profile (key, value) VALUES ('profile', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
            params![value],
        )
        .context("storage: write profile")?;
        Ok(())
    }

    fn notify(&self, event: CollectionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lookup_by_id(conn: &Connection, id: &str) -> Result<Option<CollectionEntry>> {
    conn.query_row(
        r#"
SELECT id, title, author, cover, buy_link, info_link, added_at
FROM collection_entries
WHERE id = ?1
"#,
        params![id],
        entry_from_row,
    )
    .optional()
    .context("storage: query entry by id")
}

fn lookup_by_keys(
    conn: &Connection,
    title_key: &str,
    author_key: &str,
) -> Result<Option<CollectionEntry>> {
    conn.query_row(
        r#"
SELECT id, title, author, cover, buy_link, info_link, added_at
FROM collection_entries
WHERE title_key = ?1 AND author_key = ?2
"#,
        params![title_key, author_key],
        entry_from_row,
    )
    .optional()
    .context("storage: query entry by title and author")
}

fn open_at(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("storage: open database at {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", &"WAL")
        .context("storage: set WAL")?;
    conn.pragma_update(None, "busy_timeout", &5000)
        .context("storage: set busy timeout")?;
    migrate(&conn)?;
    Ok(conn)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CollectionEntry> {
    let added: i64 = row.get(6)?;
    Ok(CollectionEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        cover: row.get(3)?,
        buy_link: row.get(4)?,
        info_link: row.get(5)?,
        added_at: Utc
            .timestamp_opt(added, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS collection_entries (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  author TEXT NOT NULL,
  title_key TEXT NOT NULL,
  author_key TEXT NOT NULL,
  cover TEXT,
  buy_link TEXT,
  info_link TEXT,
  added_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_collection_title_author
  ON collection_entries(title_key, author_key);

CREATE TABLE IF NOT EXISTS profile (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
    ]
}

fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn synthesized_id(title_key: &str, author_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(title_key.as_bytes());
    hasher.update(b"|");
    hasher.update(author_key.as_bytes());
    format!("local:{}", hex::encode(hasher.finalize()))
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bookdeck").join("collection.db"))
}
