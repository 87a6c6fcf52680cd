//! Memory module - long-term facts and searchable conversation history
//!
//! A [`MemoryStore`] owns two files under `<workspace>/memory/`:
//!
//! - `MEMORY.json`: the [`MemoryRecord`], rewritten atomically (temp file + rename)
//! - `HISTORY.jsonl`: an append-only log of [`HistoryEntry`] lines plus
//!   `archived` markers written by consolidation
//!
//! Consolidation summarizes the oldest unarchived history into facts using
//! an [`LLMProvider`], merges them into the record and then marks the range
//! archived. History lines are never rewritten or removed.

mod consolidate;
pub mod types;

pub use types::{
    ConsolidationTrigger, ExtractedFact, HistoryEntry, MemoryFact, MemoryRecord, SourceRange,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ClawError, Result};
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::{Message, Role};

use consolidate::{build_prompt, parse_facts, CONSOLIDATION_SYSTEM_PROMPT};
use types::HistoryLine;

const MEMORY_FILE: &str = "MEMORY.json";
const HISTORY_FILE: &str = "HISTORY.jsonl";

/// Default number of history entries summarized per consolidation run.
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Default)]
struct HistoryState {
    /// Sequence number the next appended entry receives
    next_seq: u64,
    /// Highest archived sequence number (0 = nothing archived)
    archived_through: u64,
    /// Unarchived entries per session, oldest first
    unarchived: HashMap<String, Vec<u64>>,
}

impl HistoryState {
    fn track(&mut self, entry: &HistoryEntry) {
        if entry.seq > self.archived_through {
            self.unarchived
                .entry(entry.session_key.clone())
                .or_default()
                .push(entry.seq);
        }
    }

    fn archive_through(&mut self, through: u64) {
        self.archived_through = self.archived_through.max(through);
        let watermark = self.archived_through;
        self.unarchived.retain(|_, seqs| {
            seqs.retain(|seq| *seq > watermark);
            !seqs.is_empty()
        });
    }
}

/// Marks a consolidation as in flight; released on drop.
#[derive(Debug)]
pub struct ConsolidationGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ConsolidationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Durable long-term memory plus append-only history for one workspace.
pub struct MemoryStore {
    dir: PathBuf,
    history: Mutex<HistoryState>,
    /// Held for the whole of a consolidation and for direct record writes
    record_lock: Mutex<()>,
    in_flight: Arc<AtomicBool>,
    batch_size: usize,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dir", &self.dir)
            .field("batch_size", &self.batch_size)
            .field("consolidating", &self.in_flight.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryStore {
    /// Open (or create) the memory store of a workspace.
    ///
    /// Scans `HISTORY.jsonl` once to recover the next sequence number and
    /// the archive watermark.
    pub fn open(workspace: &Path) -> Result<Self> {
        let dir = workspace.join("memory");
        std::fs::create_dir_all(&dir).map_err(|e| {
            ClawError::Memory(format!(
                "Failed to create memory directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut state = HistoryState {
            next_seq: 1,
            ..HistoryState::default()
        };
        let mut entries = Vec::new();
        for line in read_history_lines(&dir.join(HISTORY_FILE))? {
            match line {
                HistoryLine::Entry(entry) => {
                    state.next_seq = state.next_seq.max(entry.seq + 1);
                    entries.push(entry);
                }
                HistoryLine::Archived { through, .. } => {
                    state.archived_through = state.archived_through.max(through)
                }
            }
        }
        for entry in &entries {
            state.track(entry);
        }

        debug!(
            dir = %dir.display(),
            next_seq = state.next_seq,
            archived_through = state.archived_through,
            "Opened memory store"
        );

        Ok(Self {
            dir,
            history: Mutex::new(state),
            record_lock: Mutex::new(()),
            in_flight: Arc::new(AtomicBool::new(false)),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Set how many history entries one consolidation run covers.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Directory holding the memory files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn memory_path(&self) -> PathBuf {
        self.dir.join(MEMORY_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Read the long-term memory record. A missing file yields an empty record.
    pub async fn read_long_term(&self) -> Result<MemoryRecord> {
        let path = self.memory_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MemoryRecord::default())
            }
            Err(e) => {
                return Err(ClawError::Memory(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(MemoryRecord::default());
        }

        serde_json::from_str(&content)
            .map_err(|e| ClawError::Memory(format!("Failed to parse {}: {}", MEMORY_FILE, e)))
    }

    /// Replace the long-term memory record.
    pub async fn write_long_term(&self, record: &MemoryRecord) -> Result<()> {
        let _lock = self.record_lock.lock().await;
        self.write_record(record).await
    }

    async fn write_record(&self, record: &MemoryRecord) -> Result<()> {
        let path = self.memory_path();
        let tmp = self.dir.join(format!("{}.tmp", MEMORY_FILE));
        let json = serde_json::to_string_pretty(record)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ClawError::Memory(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Append one history entry and return its sequence number.
    pub async fn append_history(&self, session_key: &str, role: Role, text: &str) -> Result<u64> {
        let mut state = self.history.lock().await;
        let entry = HistoryEntry {
            seq: state.next_seq,
            session_key: session_key.to_string(),
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.append_line(&HistoryLine::Entry(entry.clone())).await?;
        state.track(&entry);
        state.next_seq += 1;
        Ok(state.next_seq - 1)
    }

    async fn append_line(&self, line: &HistoryLine) -> Result<()> {
        let mut encoded = serde_json::to_string(line)?;
        encoded.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .await?;
        file.write_all(encoded.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Number of history entries not yet consolidated.
    pub async fn unarchived_count(&self) -> u64 {
        let state = self.history.lock().await;
        (state.next_seq - 1).saturating_sub(state.archived_through)
    }

    /// Number of `session_key`'s history entries not yet consolidated.
    pub async fn unarchived_count_for(&self, session_key: &str) -> u64 {
        let state = self.history.lock().await;
        state
            .unarchived
            .get(session_key)
            .map_or(0, |seqs| seqs.len() as u64)
    }

    /// Oldest unarchived entries, at most `limit` of them.
    pub async fn unarchived(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let archived_through = self.history.lock().await.archived_through;
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.seq > archived_through)
            .take(limit)
            .collect())
    }

    /// Case-insensitive substring search over history, newest first.
    ///
    /// With `session_key` set only that session's entries are considered;
    /// `None` searches every session.
    pub async fn search_history(
        &self,
        query: &str,
        session_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .filter(|e| session_key.map_or(true, |key| e.session_key == key))
            .filter(|e| e.text.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    async fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let path = self.history_path();
        let lines = tokio::task::spawn_blocking(move || read_history_lines(&path))
            .await
            .map_err(|e| ClawError::Memory(format!("History read task failed: {}", e)))??;
        Ok(lines
            .into_iter()
            .filter_map(|line| match line {
                HistoryLine::Entry(entry) => Some(entry),
                HistoryLine::Archived { .. } => None,
            })
            .collect())
    }

    /// Render the long-term memory as a prompt block. Empty when nothing is remembered.
    pub async fn render_digest(&self) -> Result<String> {
        let record = self.read_long_term().await?;
        if record.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("## Long-term Memory\n");
        for fact in &record.facts {
            out.push_str(&format!("- **{}**: {}\n", fact.topic, fact.statement));
        }
        Ok(out)
    }

    /// Claim the right to run a background consolidation.
    ///
    /// Returns `None` if one is already in flight.
    pub fn try_begin_consolidation(&self) -> Option<ConsolidationGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConsolidationGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    /// Whether a consolidation guard is currently held.
    pub fn is_consolidating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Summarize the oldest unarchived history into long-term memory.
    ///
    /// With nothing to archive this returns the current record without
    /// calling the provider. On any failure nothing is archived, so the
    /// next trigger retries the same range.
    pub async fn consolidate(
        &self,
        trigger: ConsolidationTrigger,
        provider: &dyn LLMProvider,
        model: Option<&str>,
    ) -> Result<MemoryRecord> {
        let _lock = self.record_lock.lock().await;

        let batch = self.unarchived(self.batch_size).await?;
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            debug!(%trigger, "Nothing to consolidate");
            return self.read_long_term().await;
        };
        let range = SourceRange {
            start: first.seq,
            end: last.seq,
        };

        let mut record = self
            .read_long_term()
            .await
            .map_err(|e| ClawError::ConsolidationFailed(e.to_string()))?;

        let messages = vec![
            Message::system(CONSOLIDATION_SYSTEM_PROMPT),
            Message::user(&build_prompt(&record, &batch)),
        ];
        let options = ChatOptions::new()
            .with_temperature(0.2)
            .with_max_tokens(2048);

        let response = provider
            .chat(messages, vec![], model, options)
            .await
            .map_err(|e| {
                warn!(%trigger, error = %e, "Memory consolidation LLM call failed");
                ClawError::ConsolidationFailed(e.to_string())
            })?;

        let facts = parse_facts(&response.content).inspect_err(|e| {
            warn!(%trigger, error = %e, "Memory consolidation response rejected");
        })?;
        let extracted = facts.len();

        record.merge(facts, range);
        self.write_record(&record)
            .await
            .map_err(|e| ClawError::ConsolidationFailed(e.to_string()))?;

        let mut state = self.history.lock().await;
        self.append_line(&HistoryLine::Archived {
            through: range.end,
            at: Utc::now(),
            trigger,
        })
        .await
        .map_err(|e| ClawError::ConsolidationFailed(e.to_string()))?;
        state.archive_through(range.end);

        info!(
            %trigger,
            start = range.start,
            end = range.end,
            extracted,
            total_facts = record.facts.len(),
            "Consolidated memory"
        );
        Ok(record)
    }
}

/// Read every parseable line of a history file. Unparseable lines are skipped.
fn read_history_lines(path: &Path) -> Result<Vec<HistoryLine>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ClawError::Memory(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut lines = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryLine>(raw) {
            Ok(line) => lines.push(line),
            Err(e) => warn!(line = idx + 1, error = %e, "Skipping unreadable history line"),
        }
    }
    Ok(lines)
}
