//! Session module - durable per-key conversation logs
//!
//! Each session is an append-only log of [`Turn`]s. With persistence enabled
//! every session lives in its own JSONL file: a `meta` header line followed
//! by one `turn` record per line. Appends are flushed to disk before the call
//! returns.
//!
//! Logs are never deleted. Clearing or deleting a session renames its file
//! with an `archived-<ts>` suffix; an unreadable log is renamed with a
//! `corrupt-<ts>` suffix by [`SessionStore::quarantine`].
//!
//! # Example
//!
//! ```
//! use clawloop::session::{SessionStore, Turn, WindowLimit};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SessionStore::new_memory();
//!
//!     store.append("telegram:chat123", Turn::user("Hello!")).await.unwrap();
//!     store.append("telegram:chat123", Turn::assistant("Hi there!")).await.unwrap();
//!
//!     let window = store
//!         .recent_window("telegram:chat123", WindowLimit::Turns(10))
//!         .await
//!         .unwrap();
//!     assert_eq!(window.len(), 2);
//! }
//! ```

pub mod types;

pub use types::{InlineMedia, Message, Role, Session, ToolCall, Turn};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ClawError, Result};

/// File extension of live session logs
const LOG_EXTENSION: &str = "jsonl";

/// How much history [`SessionStore::recent_window`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLimit {
    /// At most this many turns
    Turns(usize),
    /// As many recent turns as fit in this estimated token budget (at least one)
    Tokens(usize),
}

/// One line of a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogRecord {
    Meta {
        key: String,
        created_at: DateTime<Utc>,
    },
    Turn(Turn),
}

/// Turns of each session held in memory unless configured otherwise.
pub const DEFAULT_CACHE_TURNS: usize = 200;

/// Sessions held in memory unless configured otherwise.
pub const DEFAULT_MAX_CACHED_SESSIONS: usize = 1024;

/// What is known about a session without rereading its log.
struct CachedSession {
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    /// Turns ever recorded, including those no longer in `tail`
    turn_count: usize,
    /// The newest turns, oldest first
    tail: VecDeque<Turn>,
}

impl CachedSession {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_active_at: now,
            turn_count: 0,
            tail: VecDeque::new(),
        }
    }

    fn from_session(session: Session, cap: Option<usize>) -> Self {
        let turn_count = session.turns.len();
        let mut tail: VecDeque<Turn> = session.turns.into();
        if let Some(cap) = cap {
            let excess = tail.len().saturating_sub(cap);
            tail.drain(..excess);
        }
        Self {
            created_at: session.created_at,
            last_active_at: session.last_active_at,
            turn_count,
            tail,
        }
    }

    fn push(&mut self, turn: Turn, cap: Option<usize>) {
        self.last_active_at = turn.timestamp;
        self.turn_count += 1;
        self.tail.push_back(turn);
        if let Some(cap) = cap {
            while self.tail.len() > cap {
                self.tail.pop_front();
            }
        }
    }

    /// Whether `tail` still holds every turn of the session.
    fn is_complete(&self) -> bool {
        self.tail.len() == self.turn_count
    }

    fn to_session(&self, key: &str) -> Session {
        Session {
            key: key.to_string(),
            turns: self.tail.iter().cloned().collect(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    /// `None` until the log has been read
    cached: Option<CachedSession>,
    /// Whether the log file (with its header) exists on disk
    persisted: bool,
}

struct SlotEntry {
    slot: Arc<Mutex<SessionSlot>>,
    last_used: Instant,
}

/// Store for durable, append-only conversation sessions.
///
/// Each key has its own lock, so appends to different sessions proceed in
/// parallel while appends to the same session are serialized.
///
/// With persistence enabled, memory use is bounded: each session keeps only
/// its newest `cache_turns` turns, and once more than `max_cached_sessions`
/// sessions are held the least recently used idle ones are dropped. Anything
/// not in memory is read back from the log on demand. A memory-only store
/// has nowhere to reread from and keeps everything.
pub struct SessionStore {
    slots: Mutex<HashMap<String, SlotEntry>>,
    storage_path: Option<PathBuf>,
    cache_turns: usize,
    max_cached_sessions: usize,
}

impl SessionStore {
    /// Create a store persisting to `~/.clawloop/sessions/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_path(Config::dir().join("sessions"))
    }

    /// Create a store from the `session` section of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::with_path(config.sessions_dir())?.with_cache_limits(
            config.session.cache_turns,
            config.session.max_cached_sessions,
        ))
    }

    /// Create an in-memory store without persistence.
    ///
    /// This is useful for testing or temporary sessions that don't
    /// need to survive application restarts.
    pub fn new_memory() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            storage_path: None,
            cache_turns: DEFAULT_CACHE_TURNS,
            max_cached_sessions: DEFAULT_MAX_CACHED_SESSIONS,
        }
    }

    /// Create a store persisting to a custom directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            storage_path: Some(path),
            ..Self::new_memory()
        })
    }

    /// Bound the in-memory cache (builder pattern). Zero values act as 1.
    pub fn with_cache_limits(mut self, cache_turns: usize, max_cached_sessions: usize) -> Self {
        self.cache_turns = cache_turns.max(1);
        self.max_cached_sessions = max_cached_sessions.max(1);
        self
    }

    /// Directory holding session logs, if persistence is enabled.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Per-session turn cap; `None` when there is no log to fall back on.
    fn tail_cap(&self) -> Option<usize> {
        self.storage_path.as_ref().map(|_| self.cache_turns)
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<SessionSlot>> {
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        let entry = slots.entry(key.to_string()).or_insert_with(|| SlotEntry {
            slot: Arc::default(),
            last_used: now,
        });
        entry.last_used = now;
        let slot = Arc::clone(&entry.slot);

        if self.storage_path.is_some() && slots.len() > self.max_cached_sessions {
            let excess = slots.len() - self.max_cached_sessions;
            let evicted = evict_oldest(&mut slots, excess, |_| true);
            if evicted > 0 {
                debug!(evicted, cached = slots.len(), "Evicted idle sessions from cache");
            }
        }
        slot
    }

    /// Drop sessions that have not been touched for `max_idle` from memory.
    ///
    /// Their logs are untouched and they reload on next use. Returns the
    /// number of sessions dropped; a memory-only store never drops any.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        if self.storage_path.is_none() {
            return 0;
        }
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        evict_oldest(&mut slots, usize::MAX, |entry| {
            now.duration_since(entry.last_used) >= max_idle
        })
    }

    fn log_path(&self, key: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", sanitize_key(key), LOG_EXTENSION)))
    }

    /// Get an existing session or create a new, empty one.
    ///
    /// The returned session holds the complete turn log; for sessions longer
    /// than the in-memory tail it is read back from disk.
    ///
    /// # Errors
    ///
    /// Returns `ClawError::SessionCorrupt` if the log on disk cannot be parsed.
    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let path = self.log_path(key);
        let cached = ensure_loaded(&mut guard, key, path.as_deref(), self.tail_cap()).await?;
        if cached.is_complete() {
            return Ok(cached.to_session(key));
        }
        Ok(load_log(key, path.as_deref()).await?.0)
    }

    /// Get a session only if it has been recorded before.
    pub async fn get(&self, key: &str) -> Result<Option<Session>> {
        if !self.exists(key).await {
            return Ok(None);
        }
        self.get_or_create(key).await.map(Some)
    }

    /// Append one turn. The turn is on disk when this returns.
    pub async fn append(&self, key: &str, turn: Turn) -> Result<()> {
        self.append_many(key, vec![turn]).await
    }

    /// Append several turns as one durable write.
    ///
    /// The write runs on its own task, so dropping the returned future does
    /// not leave a partially recorded batch behind.
    pub async fn append_many(&self, key: &str, turns: Vec<Turn>) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }

        let slot = self.slot(key).await;
        let path = self.log_path(key);
        let cap = self.tail_cap();
        let key = key.to_string();

        let handle = tokio::spawn(async move {
            let mut guard = slot.lock().await;
            ensure_loaded(&mut guard, &key, path.as_deref(), cap).await?;

            let SessionSlot { cached, persisted } = &mut *guard;
            let cached = cached.get_or_insert_with(CachedSession::new);

            if let Some(path) = &path {
                let mut records = Vec::with_capacity(turns.len() + 1);
                if !*persisted {
                    records.push(LogRecord::Meta {
                        key: key.clone(),
                        created_at: cached.created_at,
                    });
                }
                records.extend(turns.iter().cloned().map(LogRecord::Turn));
                append_records(path, &records).await?;
                *persisted = true;
            }

            let count = turns.len();
            for turn in turns {
                cached.push(turn, cap);
            }
            debug!(session_key = %key, appended = count, total = cached.turn_count, "Turns appended");
            Ok::<(), ClawError>(())
        });

        handle
            .await
            .map_err(|e| ClawError::Session(format!("append task failed: {}", e)))?
    }

    /// The most recent turns in chronological order.
    ///
    /// When the window cuts into the log it never starts on a tool result
    /// whose originating call was cut off. Windows that reach past the
    /// in-memory tail are read from the log.
    pub async fn recent_window(&self, key: &str, limit: WindowLimit) -> Result<Vec<Turn>> {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let path = self.log_path(key);
        let cached = ensure_loaded(&mut guard, key, path.as_deref(), self.tail_cap()).await?;

        let complete = cached.is_complete();
        let turns = cached.tail.make_contiguous();
        let start = window_start(turns, limit);
        if start > 0 || complete {
            let start = skip_orphaned_results(turns, start);
            return Ok(turns[start..].to_vec());
        }

        debug!(session_key = %key, "Window reaches past cached turns, reading log");
        let session = load_log(key, path.as_deref()).await?.0;
        let turns = &session.turns;
        let start = skip_orphaned_results(turns, window_start(turns, limit));
        Ok(turns[start..].to_vec())
    }

    /// Number of turns recorded for `key`. Does not reread the log once loaded.
    pub async fn turn_count(&self, key: &str) -> Result<usize> {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let cached =
            ensure_loaded(&mut guard, key, self.log_path(key).as_deref(), self.tail_cap()).await?;
        Ok(cached.turn_count)
    }

    /// Start the session over.
    ///
    /// The existing log is archived (renamed), never removed.
    pub async fn clear(&self, key: &str) -> Result<()> {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        if let Some(path) = self.log_path(key) {
            if let Some(archived) = rename_with_suffix(&path, "archived").await? {
                info!(session_key = %key, archived = %archived.display(), "Session log archived");
            }
        }
        guard.cached = Some(CachedSession::new());
        guard.persisted = false;
        Ok(())
    }

    /// Move an unreadable log aside and start the session fresh.
    ///
    /// Returns the path the log was moved to, if there was one.
    pub async fn quarantine(&self, key: &str) -> Result<Option<PathBuf>> {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let moved = match self.log_path(key) {
            Some(path) => rename_with_suffix(&path, "corrupt").await?,
            None => None,
        };
        if let Some(ref moved) = moved {
            warn!(session_key = %key, quarantined = %moved.display(), "Corrupt session log quarantined");
        }
        guard.cached = Some(CachedSession::new());
        guard.persisted = false;
        Ok(moved)
    }

    /// Remove a session from the store. Its log is archived, not deleted.
    ///
    /// Returns `true` if the session existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.exists(key).await;
        let slot = self.slot(key).await;
        let _guard = slot.lock().await;
        if let Some(path) = self.log_path(key) {
            rename_with_suffix(&path, "archived").await?;
        }
        self.slots.lock().await.remove(key);
        Ok(existed)
    }

    /// Check whether a session has been recorded (in memory or on disk).
    pub async fn exists(&self, key: &str) -> bool {
        if let Some(path) = self.log_path(key) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return true;
            }
        }
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(key).map(|entry| Arc::clone(&entry.slot))
        };
        match slot {
            Some(slot) => slot
                .lock()
                .await
                .cached
                .as_ref()
                .is_some_and(|c| c.turn_count > 0),
            None => false,
        }
    }

    /// List all known session keys, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = BTreeSet::new();

        let slots: Vec<(String, Arc<Mutex<SessionSlot>>)> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .map(|(k, entry)| (k.clone(), Arc::clone(&entry.slot)))
                .collect()
        };
        for (key, slot) in slots {
            if slot
                .lock()
                .await
                .cached
                .as_ref()
                .is_some_and(|c| c.turn_count > 0)
            {
                keys.insert(key);
            }
        }

        if let Some(ref dir) = self.storage_path {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.insert(unsanitize_key(stem));
                }
            }
        }

        Ok(keys.into_iter().collect())
    }

    /// Number of sessions held in memory.
    pub async fn cache_size(&self) -> usize {
        self.slots.lock().await.len()
    }
}

/// Remove up to `count` unused entries matching `pred`, least recently used first.
///
/// An entry whose slot is still referenced elsewhere (a caller holds it or an
/// append is in flight) is never removed.
fn evict_oldest(
    slots: &mut HashMap<String, SlotEntry>,
    count: usize,
    pred: impl Fn(&SlotEntry) -> bool,
) -> usize {
    let mut idle: Vec<(Instant, String)> = slots
        .iter()
        .filter(|(_, entry)| Arc::strong_count(&entry.slot) == 1 && pred(entry))
        .map(|(key, entry)| (entry.last_used, key.clone()))
        .collect();
    idle.sort();

    let mut evicted = 0;
    for (_, key) in idle.into_iter().take(count) {
        slots.remove(&key);
        evicted += 1;
    }
    evicted
}

/// Index of the first turn of a window over `turns`.
fn window_start(turns: &[Turn], limit: WindowLimit) -> usize {
    match limit {
        WindowLimit::Turns(n) => turns.len().saturating_sub(n),
        WindowLimit::Tokens(budget) => {
            let mut used = 0usize;
            let mut start = turns.len();
            while start > 0 {
                let cost = turns[start - 1].estimated_tokens();
                if used + cost > budget && start < turns.len() {
                    break;
                }
                used += cost;
                start -= 1;
            }
            start
        }
    }
}

/// Move a cut-off window start past tool results whose call was cut off.
fn skip_orphaned_results(turns: &[Turn], mut start: usize) -> usize {
    if start > 0 {
        while start < turns.len() && turns[start].role == Role::Tool {
            start += 1;
        }
    }
    start
}

async fn ensure_loaded<'a>(
    slot: &'a mut SessionSlot,
    key: &str,
    path: Option<&Path>,
    cap: Option<usize>,
) -> Result<&'a mut CachedSession> {
    if slot.cached.is_none() {
        let (session, persisted) = load_log(key, path).await?;
        slot.cached = Some(CachedSession::from_session(session, cap));
        slot.persisted = persisted;
    }
    Ok(slot.cached.get_or_insert_with(CachedSession::new))
}

fn corrupt(key: &str, reason: String) -> ClawError {
    ClawError::SessionCorrupt {
        key: key.to_string(),
        reason,
    }
}

async fn load_log(key: &str, path: Option<&Path>) -> Result<(Session, bool)> {
    let Some(path) = path else {
        return Ok((Session::new(key), false));
    };

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Session::new(key), false));
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(corrupt(key, format!("not valid UTF-8: {}", e)));
        }
        Err(e) => return Err(e.into()),
    };

    let mut session = Session::new(key);
    let mut saw_meta = false;
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: LogRecord = serde_json::from_str(line)
            .map_err(|e| corrupt(key, format!("line {}: {}", idx + 1, e)))?;
        match record {
            LogRecord::Meta {
                key: stored,
                created_at,
            } => {
                if stored != key {
                    return Err(corrupt(
                        key,
                        format!("log belongs to session '{}'", stored),
                    ));
                }
                session.created_at = created_at;
                session.last_active_at = created_at;
                saw_meta = true;
            }
            LogRecord::Turn(turn) => {
                if !saw_meta {
                    return Err(corrupt(key, "turn record before header".to_string()));
                }
                session.push(turn);
            }
        }
    }

    Ok((session, saw_meta))
}

async fn append_records(path: &Path, records: &[LogRecord]) -> Result<()> {
    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let before = file.metadata().await?.len();

    let written: std::io::Result<()> = async {
        file.write_all(buf.as_bytes()).await?;
        file.sync_data().await
    }
    .await;

    if let Err(e) = written {
        // Roll back a torn write so the log stays parseable
        if let Err(trunc) = file.set_len(before).await {
            warn!(path = %path.display(), error = %trunc, "Failed to roll back partial session write");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Rename `path` to `<path>.<label>-<timestamp>` if it exists.
async fn rename_with_suffix(path: &Path, label: &str) -> Result<Option<PathBuf>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".{}-{}", label, stamp));
    let target = PathBuf::from(target);
    tokio::fs::rename(path, &target).await?;
    Ok(Some(target))
}

/// Percent-encode characters that are problematic in filenames.
///
/// The mapping is reversible via [`unsanitize_key`].
fn sanitize_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() * 3);
    for c in key.chars() {
        match c {
            '/' => result.push_str("%2F"),
            '\\' => result.push_str("%5C"),
            ':' => result.push_str("%3A"),
            '*' => result.push_str("%2A"),
            '?' => result.push_str("%3F"),
            '"' => result.push_str("%22"),
            '<' => result.push_str("%3C"),
            '>' => result.push_str("%3E"),
            '|' => result.push_str("%7C"),
            '.' => result.push_str("%2E"),
            '%' => result.push_str("%25"),
            c => result.push(c),
        }
    }
    result
}

fn unsanitize_key(sanitized: &str) -> String {
    let mut result = String::with_capacity(sanitized.len());
    let mut chars = sanitized.chars();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            match u8::from_str_radix(&hex, 16) {
                Ok(byte) if hex.len() == 2 => result.push(byte as char),
                _ => {
                    result.push('%');
                    result.push_str(&hex);
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::ToolCall;
    use serde_json::json;
    use tempfile::TempDir;

    fn disk_store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_path(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_get_or_create_new_session() {
        let store = SessionStore::new_memory();
        let session = store.get_or_create("cli:1").await.unwrap();
        assert_eq!(session.key, "cli:1");
        assert!(session.is_empty());
        assert!(!store.exists("cli:1").await);
    }

    #[tokio::test]
    async fn test_append_then_window_round_trip() {
        let (_dir, store) = disk_store();
        let turns: Vec<Turn> = (0..6).map(|i| Turn::user(&format!("m{}", i))).collect();
        for turn in &turns {
            store.append("k", turn.clone()).await.unwrap();
        }

        let window = store
            .recent_window("k", WindowLimit::Turns(6))
            .await
            .unwrap();
        assert_eq!(window, turns);

        let tail = store
            .recent_window("k", WindowLimit::Turns(2))
            .await
            .unwrap();
        assert_eq!(tail, turns[4..].to_vec());
    }

    #[tokio::test]
    async fn test_persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SessionStore::with_path(dir.path().to_path_buf()).unwrap();
            store.append("telegram:42", Turn::user("hello")).await.unwrap();
            store
                .append_many(
                    "telegram:42",
                    vec![Turn::assistant("hi"), Turn::user("bye")],
                )
                .await
                .unwrap();
        }

        let store = SessionStore::with_path(dir.path().to_path_buf()).unwrap();
        let session = store.get_or_create("telegram:42").await.unwrap();
        let contents: Vec<&str> = session.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi", "bye"]);
        assert_eq!(store.list().await.unwrap(), vec!["telegram:42".to_string()]);
    }

    #[tokio::test]
    async fn test_log_has_header_and_one_line_per_turn() {
        let (dir, store) = disk_store();
        store.append("a:b", Turn::user("x")).await.unwrap();
        store.append("a:b", Turn::assistant("y")).await.unwrap();

        let path = dir.path().join("a%3Ab.jsonl");
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"type\":\"meta\""));
        assert!(lines[1].contains("\"type\":\"turn\""));
    }

    #[tokio::test]
    async fn test_corrupt_log_detected_and_quarantined() {
        let (dir, store) = disk_store();
        store.append("k", Turn::user("fine")).await.unwrap();

        let path = dir.path().join("k.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        let fresh = SessionStore::with_path(dir.path().to_path_buf()).unwrap();
        let err = fresh
            .recent_window("k", WindowLimit::Turns(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::SessionCorrupt { .. }));

        let moved = fresh.quarantine("k").await.unwrap().unwrap();
        assert!(moved.exists());
        assert!(moved.to_string_lossy().contains(".corrupt-"));
        assert!(!path.exists());

        // Starts fresh and keeps working
        let session = fresh.get_or_create("k").await.unwrap();
        assert!(session.is_empty());
        fresh.append("k", Turn::user("again")).await.unwrap();
        assert_eq!(fresh.turn_count("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_archives_log() {
        let (dir, store) = disk_store();
        store.append("k", Turn::user("old")).await.unwrap();
        store.clear("k").await.unwrap();

        assert_eq!(store.turn_count("k").await.unwrap(), 0);
        let archived: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".archived-"))
            .collect();
        assert_eq!(archived.len(), 1);

        store.append("k", Turn::user("new")).await.unwrap();
        let reopened = SessionStore::with_path(dir.path().to_path_buf()).unwrap();
        let session = reopened.get_or_create("k").await.unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].content, "new");
    }

    #[tokio::test]
    async fn test_window_skips_orphaned_tool_results() {
        let store = SessionStore::new_memory();
        let call = ToolCall::new("c1", "echo", json!({"message": "x"}));
        store
            .append_many(
                "k",
                vec![
                    Turn::user("q"),
                    Turn::assistant_with_tools("", vec![call]),
                    Turn::tool_result("c1", "x", false),
                    Turn::assistant("done"),
                ],
            )
            .await
            .unwrap();

        let window = store
            .recent_window("k", WindowLimit::Turns(2))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "done");
    }

    #[tokio::test]
    async fn test_token_window() {
        let store = SessionStore::new_memory();
        store
            .append_many(
                "k",
                vec![
                    Turn::user(&"a".repeat(400)),
                    Turn::user(&"b".repeat(40)),
                    Turn::user(&"c".repeat(40)),
                ],
            )
            .await
            .unwrap();

        let window = store
            .recent_window("k", WindowLimit::Tokens(25))
            .await
            .unwrap();
        assert_eq!(window.len(), 2);

        // Always returns at least the newest turn
        let window = store
            .recent_window("k", WindowLimit::Tokens(1))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert!(window[0].content.starts_with('c'));
    }

    #[tokio::test]
    async fn test_concurrent_appends_distinct_keys() {
        let store = Arc::new(SessionStore::new_memory());
        let mut handles = Vec::new();
        for k in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append(&format!("k{}", k), Turn::user(&i.to_string()))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        for k in 0..4 {
            let session = store.get_or_create(&format!("k{}", k)).await.unwrap();
            let order: Vec<String> = session.turns.iter().map(|t| t.content.clone()).collect();
            let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
            assert_eq!(order, expected);
        }
    }

    #[tokio::test]
    async fn test_delete_archives_and_forgets() {
        let (_dir, store) = disk_store();
        store.append("k", Turn::user("x")).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.exists("k").await);
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_holds_only_tail_of_long_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_path(dir.path().to_path_buf())
            .unwrap()
            .with_cache_limits(3, 16);
        let turns: Vec<Turn> = (0..10).map(|i| Turn::user(&format!("m{}", i))).collect();
        for turn in &turns {
            store.append("k", turn.clone()).await.unwrap();
        }

        {
            let slot = store.slot("k").await;
            let guard = slot.lock().await;
            let cached = guard.cached.as_ref().unwrap();
            assert_eq!(cached.tail.len(), 3);
            assert_eq!(cached.turn_count, 10);
        }

        // Served from memory
        let short = store.recent_window("k", WindowLimit::Turns(2)).await.unwrap();
        assert_eq!(short, turns[8..].to_vec());
        // Reaches past the tail, served from the log
        let long = store.recent_window("k", WindowLimit::Turns(6)).await.unwrap();
        assert_eq!(long, turns[4..].to_vec());

        assert_eq!(store.turn_count("k").await.unwrap(), 10);
        assert_eq!(store.get_or_create("k").await.unwrap().turns, turns);
    }

    #[tokio::test]
    async fn test_window_from_log_skips_orphans_beyond_tail() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_path(dir.path().to_path_buf())
            .unwrap()
            .with_cache_limits(2, 16);
        let call = ToolCall::new("c1", "echo", json!({"message": "x"}));
        store
            .append_many(
                "k",
                vec![
                    Turn::user("q"),
                    Turn::assistant_with_tools("", vec![call]),
                    Turn::tool_result("c1", "x", false),
                    Turn::assistant("done"),
                ],
            )
            .await
            .unwrap();

        let window = store.recent_window("k", WindowLimit::Turns(2)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "done");

        let window = store.recent_window("k", WindowLimit::Turns(3)).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used_sessions() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_path(dir.path().to_path_buf())
            .unwrap()
            .with_cache_limits(10, 2);
        for k in 0..5 {
            store
                .append(&format!("k{}", k), Turn::user(&format!("hello {}", k)))
                .await
                .unwrap();
        }
        assert!(store.cache_size().await <= 2);

        // Evicted sessions reload from their logs
        let window = store.recent_window("k0", WindowLimit::Turns(5)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "hello 0");
        assert_eq!(store.list().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let (_dir, store) = disk_store();
        store.append("a", Turn::user("x")).await.unwrap();
        store.append("b", Turn::user("y")).await.unwrap();
        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 2);
        assert_eq!(store.cache_size().await, 0);
        assert_eq!(store.turn_count("a").await.unwrap(), 1);

        let memory = SessionStore::new_memory();
        memory.append("a", Turn::user("x")).await.unwrap();
        assert_eq!(memory.evict_idle(Duration::ZERO).await, 0);
        assert_eq!(memory.turn_count("a").await.unwrap(), 1);
    }

    #[test]
    fn test_sanitize_round_trip() {
        for key in ["telegram:123", "a/b\\c", "100%", "x.y:z", "plain"] {
            let sanitized = sanitize_key(key);
            assert!(!sanitized.contains(':'));
            assert!(!sanitized.contains('/'));
            assert!(!sanitized.contains('.'));
            assert_eq!(unsanitize_key(&sanitized), key);
        }
    }
}
