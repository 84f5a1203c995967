/// Masking and bounding of configuration values in logs and error text
///
/// Parameters marked non-disclosable (passwords, shared secrets) must never
/// show up in normalization logs or reload-refusal messages, and no value may
/// flood a single-line message however large the backend made it. Everything
/// that renders a value goes through here.
use std::fmt;

/// Placeholder emitted instead of a non-disclosable value.
pub const WITHHELD: &str = "<value withheld>";

/// Longest rendered value allowed into a message or log record.
pub const MAX_DIAGNOSTIC_LENGTH: usize = 120;

/// Render a value for logging, honoring the schema's disclosure flag.
pub fn value(no_disclosure: bool, v: &impl fmt::Display) -> String {
    if no_disclosure {
        WITHHELD.to_string()
    } else {
        truncate_diagnostic(&v.to_string())
    }
}

/// Bound a rendered value to MAX_DIAGNOSTIC_LENGTH so one oversized
/// configuration entry cannot flood a single-line message.
pub fn truncate_diagnostic(rendered: &str) -> String {
    if rendered.len() <= MAX_DIAGNOSTIC_LENGTH {
        return rendered.to_string();
    }
    // Leave room for "..." (3 chars)
    let target_len = MAX_DIAGNOSTIC_LENGTH - 3;

    // Find a valid UTF-8 char boundary at or before target_len
    let mut truncate_at = target_len;
    while truncate_at > 0 && !rendered.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    if truncate_at == 0 {
        // Edge case: couldn't find a valid boundary
        return "...".to_string();
    }

    format!("{}...", &rendered[..truncate_at])
}

/// Like [`value`] for optional values; `None` renders as `undefined`.
pub fn optional_value(no_disclosure: bool, v: Option<&impl fmt::Display>) -> String {
    match v {
        Some(v) => value(no_disclosure, v),
        None if no_disclosure => WITHHELD.to_string(),
        None => "undefined".to_string(),
    }
}
