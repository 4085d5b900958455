//! Legacy free-form field normalization.
//!
//! Transcript rows carry `action_items`, `decisions`, and `follow_ups` as
//! TEXT blobs written by several generations of the capture pipeline: bare
//! prose, JSON arrays of strings, or JSON arrays of objects whose key names
//! drifted over time (`assignee` vs `owner` vs `assigned_to`). Normalization
//! turns any of these into typed records with stable identifiers.
//!
//! This function is total: malformed input produces an empty sequence plus a
//! recorded warning, never an error.

use serde_json::Value;

/// Kind of child record a blob field normalizes into. Drives the id suffix
/// so identifiers stay stable across re-runs of the same migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Action,
    Decision,
    FollowUp,
}

impl ItemKind {
    fn id_slug(&self) -> &'static str {
        match self {
            ItemKind::Action => "act",
            ItemKind::Decision => "dec",
            ItemKind::FollowUp => "fup",
        }
    }
}

/// One normalized child record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub id: String,
    pub content: String,
    pub assignee: Option<String>,
    pub due_date: Option<String>,
    pub status: String,
}

/// Result of normalizing one blob field. `warnings` records every shape the
/// parser had to give up on; the caller logs and counts them.
#[derive(Debug, Default)]
pub struct NormalizedItems {
    pub items: Vec<NormalizedItem>,
    pub warnings: Vec<String>,
}

/// Ordered candidate keys per concept; first match wins.
const TEXT_KEYS: &[&str] = &["text", "content", "description", "item", "task", "title"];
const ASSIGNEE_KEYS: &[&str] = &["assignee", "owner", "assigned_to", "who"];
const DUE_KEYS: &[&str] = &["due_date", "dueDate", "due", "deadline"];
const STATUS_KEYS: &[&str] = &["status", "state"];

/// Newly created records start here unless the legacy object said otherwise.
pub const DEFAULT_STATUS: &str = "pending";

/// Case-insensitive markers that reclassify an action item as a follow-up.
const FOLLOW_UP_KEYWORDS: &[&str] = &[
    "follow up",
    "follow-up",
    "followup",
    "reach out",
    "schedule",
    "call",
    "email",
    "check in",
    "circle back",
];

/// Normalize one legacy blob field into typed records.
///
/// `parent_id` scopes the generated identifiers: the n-th record of a field
/// gets `<parent_id>-<kind>-<n>`, which is stable for a given source row.
pub fn normalize_field(parent_id: &str, kind: ItemKind, raw: Option<&str>) -> NormalizedItems {
    let mut out = NormalizedItems::default();

    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r.trim(),
        _ => return out,
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(elems)) => {
            for elem in elems {
                match normalized_content(&elem, &mut out.warnings) {
                    Some(content) => {
                        let idx = out.items.len();
                        out.items
                            .push(item_from_value(parent_id, kind, idx, content, &elem));
                    }
                    None => continue,
                }
            }
        }
        // A JSON-encoded bare string is one opaque record.
        Ok(Value::String(s)) => {
            if !s.trim().is_empty() {
                out.items
                    .push(plain_item(parent_id, kind, 0, s.trim().to_string()));
            }
        }
        // Valid JSON of the wrong shape (object, number, ...): nothing we
        // can safely extract rows from.
        Ok(other) => {
            out.warnings.push(format!(
                "expected an array, found {}",
                json_type_name(&other)
            ));
        }
        Err(e) => {
            // Looks structural but doesn't parse: malformed, skip with a
            // warning. Anything else is legacy bare prose, kept whole.
            if raw.starts_with('[') || raw.starts_with('{') {
                out.warnings.push(format!("malformed JSON: {}", e));
            } else {
                out.items
                    .push(plain_item(parent_id, kind, 0, raw.to_string()));
            }
        }
    }

    for warning in &out.warnings {
        log::warn!("normalizer: {} field of {}: {}", kind.id_slug(), parent_id, warning);
    }

    out
}

/// Secondary pass: duplicate action items whose text matches a follow-up
/// keyword into the follow-up set. Matches are copied, never moved; the
/// derived records get their own identifier space (`-fup-auto-`).
pub fn derive_follow_ups(parent_id: &str, actions: &[NormalizedItem]) -> Vec<NormalizedItem> {
    let mut derived = Vec::new();
    for action in actions {
        let lowered = action.content.to_lowercase();
        if FOLLOW_UP_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            derived.push(NormalizedItem {
                id: format!("{}-fup-auto-{}", parent_id, derived.len()),
                content: action.content.clone(),
                assignee: action.assignee.clone(),
                due_date: action.due_date.clone(),
                status: DEFAULT_STATUS.to_string(),
            });
        }
    }
    derived
}

/// Extract display text from one array element, or record why we couldn't.
fn normalized_content(elem: &Value, warnings: &mut Vec<String>) -> Option<String> {
    match elem {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(text) = map.get(*key).and_then(Value::as_str) {
                    let text = text.trim();
                    if !text.is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
            // No recognized text key: degrade to opaque text rather than
            // dropping user data.
            Some(elem.to_string())
        }
        Value::Null => {
            warnings.push("null entry skipped".to_string());
            None
        }
        // Numbers and booleans are odd but not worth losing.
        other => Some(other.to_string()),
    }
}

fn item_from_value(
    parent_id: &str,
    kind: ItemKind,
    idx: usize,
    content: String,
    elem: &Value,
) -> NormalizedItem {
    let (assignee, due_date, status) = match elem {
        Value::Object(map) => (
            first_string(map, ASSIGNEE_KEYS),
            first_string(map, DUE_KEYS),
            first_string(map, STATUS_KEYS),
        ),
        _ => (None, None, None),
    };

    NormalizedItem {
        id: format!("{}-{}-{}", parent_id, kind.id_slug(), idx),
        content,
        assignee,
        due_date,
        status: status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
    }
}

fn plain_item(parent_id: &str, kind: ItemKind, idx: usize, content: String) -> NormalizedItem {
    NormalizedItem {
        id: format!("{}-{}-{}", parent_id, kind.id_slug(), idx),
        content,
        assignee: None,
        due_date: None,
        status: DEFAULT_STATUS.to_string(),
    }
}

/// Resolve the first non-empty string among `keys`, in order.
fn first_string(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = map.get(*key).and_then(Value::as_str) {
            let v = v.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_of_strings() {
        let out = normalize_field("t1", ItemKind::Action, Some(r#"["Call Bob", "Email report"]"#));
        assert!(out.warnings.is_empty());
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].content, "Call Bob");
        assert_eq!(out.items[0].id, "t1-act-0");
        assert_eq!(out.items[0].status, "pending");
        assert_eq!(out.items[1].content, "Email report");
        assert_eq!(out.items[1].id, "t1-act-1");
        assert_eq!(out.items[1].status, "pending");
    }

    #[test]
    fn test_keyword_reclassification_duplicates_not_moves() {
        // Both "Call Bob" (keyword "call") and "Email report" (keyword
        // "email") are duplicated into the follow-up set, while the
        // originals stay action items.
        let out = normalize_field("t1", ItemKind::Action, Some(r#"["Call Bob", "Email report"]"#));
        let derived = derive_follow_ups("t1", &out.items);

        assert_eq!(out.items.len(), 2, "originals must not be moved");
        assert!(derived.iter().any(|f| f.content == "Email report"));
        assert!(derived.iter().any(|f| f.content == "Call Bob"));
        assert!(derived.iter().all(|f| f.status == "pending"));
        assert!(derived.iter().all(|f| f.id.contains("-fup-auto-")));
    }

    #[test]
    fn test_non_array_object_yields_warning_not_error() {
        let out = normalize_field("t1", ItemKind::Action, Some(r#"{"not":"an array"}"#));
        assert!(out.items.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("an object"));
    }

    #[test]
    fn test_object_array_with_drifting_keys() {
        let raw = r#"[
            {"text": "Send proposal", "assignee": "ana", "due_date": "2024-03-01"},
            {"task": "Review budget", "owner": "bo"},
            {"description": "Ship beta", "assigned_to": "cy", "deadline": "2024-04-01", "state": "done"}
        ]"#;
        let out = normalize_field("t9", ItemKind::Action, Some(raw));
        assert_eq!(out.items.len(), 3);

        assert_eq!(out.items[0].content, "Send proposal");
        assert_eq!(out.items[0].assignee.as_deref(), Some("ana"));
        assert_eq!(out.items[0].due_date.as_deref(), Some("2024-03-01"));

        assert_eq!(out.items[1].content, "Review budget");
        assert_eq!(out.items[1].assignee.as_deref(), Some("bo"));
        assert_eq!(out.items[1].status, "pending");

        assert_eq!(out.items[2].content, "Ship beta");
        assert_eq!(out.items[2].assignee.as_deref(), Some("cy"));
        assert_eq!(out.items[2].due_date.as_deref(), Some("2024-04-01"));
        assert_eq!(out.items[2].status, "done");
    }

    #[test]
    fn test_unrecognized_object_degrades_to_opaque_text() {
        let out = normalize_field("t1", ItemKind::Decision, Some(r#"[{"weird": true}]"#));
        assert_eq!(out.items.len(), 1);
        assert!(out.items[0].content.contains("weird"));
    }

    #[test]
    fn test_bare_prose_kept_whole() {
        let out = normalize_field("t1", ItemKind::FollowUp, Some("ping legal about the NDA"));
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].content, "ping legal about the NDA");
        assert_eq!(out.items[0].id, "t1-fup-0");
    }

    #[test]
    fn test_totality_never_panics() {
        // Empty, absent, malformed JSON, non-array JSON, mixed arrays.
        let inputs: &[Option<&str>] = &[
            None,
            Some(""),
            Some("   "),
            Some("[broken"),
            Some("{half: object"),
            Some("42"),
            Some("true"),
            Some("null"),
            Some(r#"[null, 7, true, "ok", {"text":"x"}, []]"#),
            Some(r#""just a quoted string""#),
        ];
        for raw in inputs {
            let out = normalize_field("t1", ItemKind::Action, *raw);
            // Every shape must come back as a (possibly empty) sequence.
            assert!(out.items.len() <= 6);
        }
    }

    #[test]
    fn test_malformed_structural_input_warns_and_yields_empty() {
        let out = normalize_field("t1", ItemKind::Action, Some("[broken"));
        assert!(out.items.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("malformed"));
    }

    #[test]
    fn test_mixed_array_keeps_salvageable_entries() {
        let out = normalize_field(
            "t1",
            ItemKind::Action,
            Some(r#"[null, "ok", {"text": "fine"}, 3]"#),
        );
        // null skipped with a warning; string, object, number salvaged.
        assert_eq!(out.items.len(), 3);
        assert_eq!(out.warnings.len(), 1);
        // Array element of array kind is itself degraded to opaque text
        // elsewhere; ids remain dense over produced items.
        assert_eq!(out.items[0].id, "t1-act-0");
        assert_eq!(out.items[1].id, "t1-act-1");
        assert_eq!(out.items[2].id, "t1-act-2");
    }

    #[test]
    fn test_json_encoded_bare_string() {
        let out = normalize_field("t1", ItemKind::Action, Some(r#""Email the board""#));
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].content, "Email the board");
    }
}
