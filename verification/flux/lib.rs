//! Flux Refinement Types for siprelay
//!
//! This module contains Flux refinement type annotations for critical functions.
//! To verify, install Flux and run: flux-rs check verification/flux/lib.rs
//!
//! Flux installation: https://github.com/flux-rs/flux

// ============================================================================
// DIAGNOSTIC RENDERING: value text bounded by MAX_DIAGNOSTIC_LENGTH
// ============================================================================

const MAX_DIAGNOSTIC_LENGTH: usize = 120;

/// Truncate a configuration value's diagnostic text so one bad value cannot
/// flood a single-line error message or a log record
///
/// Flux signature ensures output length <= MAX_DIAGNOSTIC_LENGTH
#[flux::sig(fn(rendered: &str) -> String{v: v.len() <= MAX_DIAGNOSTIC_LENGTH})]
pub fn truncate_diagnostic(rendered: &str) -> String {
    if rendered.len() <= MAX_DIAGNOSTIC_LENGTH {
        rendered.to_string()
    } else {
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
}

// ============================================================================
// STRING GUARD: one-character strings are refused
// ============================================================================

/// Accept a configured string length. Exactly one character is ambiguous
/// with a stray list element and refused; empty strings pass so the
/// required-value check can own them.
///
/// Flux signature ties the boolean to the length
#[flux::sig(fn(len: usize) -> bool[len != 1])]
pub fn string_length_ok(len: usize) -> bool {
    len != 1
}

// ============================================================================
// EXPIRY SWEEP: deletions never exceed the record count
// ============================================================================

/// Count how many expiry stamps are dead at `now` (0 means never)
///
/// Flux signature bounds the count by the slice length
#[flux::sig(fn(expires: &[u64][n], now: u64) -> usize{v: v <= n})]
pub fn count_expired(expires: &[u64], now: u64) -> usize {
    let mut count = 0;
    for i in 0..expires.len() {
        let expire = expires[i];
        if expire > 0 && expire <= now {
            count += 1;
        }
    }
    count
}

// ============================================================================
// TESTS (standard Rust tests, Flux verifies at compile time)
// ============================================================================
