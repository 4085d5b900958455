//! Outward-facing error redaction.
//!
//! Every error text that leaves the engine boundary passes through
//! [`sanitize_message`]: filesystem path fragments (Unix and drive-letter
//! forms) are replaced with a placeholder, generic database-error prefixes
//! are stripped, and the result is truncated to a bounded length. The UI
//! should never learn the local filesystem layout from a failure message.

use std::sync::OnceLock;

use regex::Regex;

/// Replacement token for redacted filesystem paths.
const PATH_PLACEHOLDER: &str = "<path>";

/// Upper bound on sanitized message length, in characters.
const MAX_MESSAGE_CHARS: usize = 300;

/// Fallback when sanitization leaves nothing useful behind.
const FALLBACK_MESSAGE: &str = "internal database error";

/// Noise prefixes emitted by the SQLite layer. Stripped case-insensitively,
/// repeatedly, so "SQLite error: database error: ..." loses both.
const NOISE_PREFIXES: &[&str] = &[
    "sqlite error:",
    "sqlite failure:",
    "database error:",
    "error returned from database:",
    "sql error:",
    "transaction failed:",
];

fn unix_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Two or more separated components, e.g. /home/user/captures/x.db
    RE.get_or_init(|| Regex::new(r"(?:/[\w.@~-]+){2,}/?").expect("valid unix path regex"))
}

fn windows_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Drive-letter form, e.g. C:\Users\user\captures.db
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z]:\\(?:[\w.@~ -]+\\?)+").expect("valid windows path regex")
    })
}

/// Sanitize one error message for display outside the engine.
pub fn sanitize_message(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    // Strip database-layer noise prefixes (possibly stacked).
    loop {
        let lowered = text.to_lowercase();
        let Some(prefix) = NOISE_PREFIXES.iter().find(|p| lowered.starts_with(**p)) else {
            break;
        };
        text = text[prefix.len()..].trim_start().to_string();
    }

    // Redact path fragments.
    let text = unix_path_re().replace_all(&text, PATH_PLACEHOLDER);
    let text = windows_path_re().replace_all(&text, PATH_PLACEHOLDER);
    let mut text = text.trim().to_string();

    // Bounded length: truncate on a char boundary.
    if text.chars().count() > MAX_MESSAGE_CHARS {
        text = text.chars().take(MAX_MESSAGE_CHARS).collect::<String>() + "…";
    }

    if text.is_empty() {
        FALLBACK_MESSAGE.to_string()
    } else {
        text
    }
}
