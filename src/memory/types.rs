//! Memory document and history record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Role;

/// Inclusive range of history sequence numbers a fact was distilled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: u64,
    pub end: u64,
}

/// A single durable fact in long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Short subject label, e.g. "user location". Matched case-insensitively on merge.
    pub topic: String,
    /// The fact itself
    pub statement: String,
    pub source_turn_range: SourceRange,
}

/// The long-term memory document. Rewritten wholesale on every consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(default)]
    pub facts: Vec<MemoryFact>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MemoryRecord {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl MemoryRecord {
    /// Look up a fact by topic (case-insensitive).
    pub fn fact(&self, topic: &str) -> Option<&MemoryFact> {
        let topic = topic.trim();
        self.facts
            .iter()
            .find(|f| f.topic.trim().eq_ignore_ascii_case(topic))
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Merge freshly extracted facts into this record.
    ///
    /// A fact whose topic already exists replaces the old statement; new
    /// topics are appended in the order given. Facts with an empty topic or
    /// statement are ignored.
    pub fn merge(&mut self, extracted: Vec<ExtractedFact>, range: SourceRange) {
        for fact in extracted {
            let topic = fact.topic.trim();
            let statement = fact.statement.trim();
            if topic.is_empty() || statement.is_empty() {
                continue;
            }

            match self
                .facts
                .iter_mut()
                .find(|f| f.topic.trim().eq_ignore_ascii_case(topic))
            {
                Some(existing) => {
                    existing.statement = statement.to_string();
                    existing.source_turn_range = range;
                }
                None => self.facts.push(MemoryFact {
                    topic: topic.to_string(),
                    statement: statement.to_string(),
                    source_turn_range: range,
                }),
            }
        }
        self.updated_at = Utc::now();
    }
}

/// A fact as returned by the consolidation model, before it is placed in a record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedFact {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub statement: String,
}

/// One entry of the append-only conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic sequence number, starting at 1
    pub seq: u64,
    pub session_key: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// What caused a consolidation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationTrigger {
    /// Unarchived history crossed the configured threshold
    Threshold,
    /// A session was reset with `/new`
    SessionReset,
    /// Requested explicitly by the embedding application
    Manual,
}

impl std::fmt::Display for ConsolidationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConsolidationTrigger::Threshold => "threshold",
            ConsolidationTrigger::SessionReset => "session_reset",
            ConsolidationTrigger::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// One line of `HISTORY.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HistoryLine {
    Entry(HistoryEntry),
    /// Every entry with `seq <= through` has been consolidated
    Archived {
        through: u64,
        at: DateTime<Utc>,
        trigger: ConsolidationTrigger,
    },
}
