//! Prompt construction and response parsing for memory consolidation.

use serde_json::Value;

use crate::error::{ClawError, Result};
use crate::utils::string::{preview, strip_markdown_fences};

use super::types::{ExtractedFact, HistoryEntry, MemoryRecord};

/// Instructions given to the model ahead of the conversation excerpt.
pub(crate) const CONSOLIDATION_SYSTEM_PROMPT: &str = "You are a memory consolidation agent. \
You read conversation excerpts and extract durable facts worth remembering across \
conversations: who the user is, where they are, their preferences and habits, ongoing \
projects, decisions and commitments. Ignore small talk and one-off requests.";

/// Build the user prompt for one consolidation batch.
pub(crate) fn build_prompt(current: &MemoryRecord, entries: &[HistoryEntry]) -> String {
    let known = if current.facts.is_empty() {
        "(none)".to_string()
    } else {
        current
            .facts
            .iter()
            .map(|f| format!("- {}: {}", f.topic, f.statement))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let conversation = entries
        .iter()
        .map(|e| {
            format!(
                "[{}] {} ({}): {}",
                e.timestamp.format("%Y-%m-%d %H:%M"),
                e.role,
                e.session_key,
                e.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Return a JSON object of the form {{"facts": [{{"topic": "...", "statement": "..."}}]}}.

Use a short, stable topic label for each fact. Reuse the exact topic of a known fact when the conversation updates it. Only include facts that are new or changed. Return {{"facts": []}} if there is nothing worth keeping.

## Known facts
{known}

## Conversation
{conversation}

Respond with ONLY valid JSON, no markdown fences."#
    )
}

/// Parse the model's reply into extracted facts.
///
/// Accepts `{"facts": [...]}` or a bare array, optionally wrapped in a
/// markdown code fence. Items without a string topic and statement are
/// dropped.
pub(crate) fn parse_facts(response: &str) -> Result<Vec<ExtractedFact>> {
    let json_str = strip_markdown_fences(response);
    let parsed: Value = serde_json::from_str(json_str).map_err(|e| {
        ClawError::ConsolidationFailed(format!(
            "response is not valid JSON ({}): {}",
            e,
            preview(response, 200)
        ))
    })?;

    let items = match parsed {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("facts") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ClawError::ConsolidationFailed(
                    "response has no 'facts' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ClawError::ConsolidationFailed(
                "response is neither an object nor an array".to_string(),
            ))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ExtractedFact>(item).ok())
        .filter(|f| !f.topic.trim().is_empty() && !f.statement.trim().is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryFact, SourceRange};
    use crate::session::Role;
    use chrono::Utc;

    #[test]
    fn test_parse_object_form() {
        let facts =
            parse_facts(r#"{"facts":[{"topic":"Name","statement":"User is Ana"}]}"#).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].topic, "Name");
    }

    #[test]
    fn test_parse_fenced_array() {
        let facts = parse_facts(
            "```json\n[{\"topic\":\"Tz\",\"statement\":\"UTC+1\"},{\"topic\":\"x\"}]\n```",
        )
        .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].statement, "UTC+1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_facts("I could not find any facts."),
            Err(ClawError::ConsolidationFailed(_))
        ));
        assert!(matches!(
            parse_facts(r#"{"memory":"something"}"#),
            Err(ClawError::ConsolidationFailed(_))
        ));
    }

    #[test]
    fn test_prompt_lists_known_facts_and_entries() {
        let record = MemoryRecord {
            facts: vec![MemoryFact {
                topic: "Editor".into(),
                statement: "Uses Helix".into(),
                source_turn_range: SourceRange { start: 1, end: 2 },
            }],
            updated_at: Utc::now(),
        };
        let entries = vec![HistoryEntry {
            seq: 3,
            session_key: "telegram:42".into(),
            role: Role::User,
            text: "I switched to Zed".into(),
            timestamp: Utc::now(),
        }];

        let prompt = build_prompt(&record, &entries);
        assert!(prompt.contains("- Editor: Uses Helix"));
        assert!(prompt.contains("user (telegram:42): I switched to Zed"));
    }
}
