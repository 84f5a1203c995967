//! Verus Formal Verification for siprelay
//!
//! This module contains Verus specifications and proofs for critical functions.
//! To verify, install Verus and run: verus verification/verus/src/lib.rs
//!
//! Verus installation: https://github.com/verus-lang/verus

use vstd::prelude::*;

verus! {

// ============================================================================
// TRANSACTION EXPIRY: 0 means never, otherwise absolute deadline
// ============================================================================

/// Specification: when a record with this expiry is dead at `now`
#[spec]
pub fn is_expired(expire: u64, now: u64) -> bool {
    expire > 0 && expire <= now
}

/// Proof: a zero expiry never fires
#[proof]
pub fn lemma_zero_never_expires(now: u64)
    ensures
        !is_expired(0, now),
{
    // Direct from definition
}

/// Proof: expiry is monotone in time; once dead, always dead
#[proof]
pub fn lemma_expiry_monotone(expire: u64, early: u64, late: u64)
    requires
        early <= late,
        is_expired(expire, early),
    ensures
        is_expired(expire, late),
{
    // expire <= early <= late
}

/// Proof: a record expiring in the future is alive now
#[proof]
pub fn lemma_future_expiry_alive(expire: u64, now: u64)
    requires
        expire > now,
    ensures
        !is_expired(expire, now),
{
    // expire > now contradicts expire <= now
}

/// Executable sweep over expiry stamps with a verified postcondition:
/// nothing expired survives and nothing alive is invented.
#[exec]
pub fn sweep_verified(expires: &Vec<u64>, now: u64) -> (kept: Vec<u64>)
    ensures
        kept.len() <= expires.len(),
        forall|j: int| 0 <= j < kept.len() ==> !is_expired(kept[j], now),
{
    let mut kept: Vec<u64> = Vec::new();

    let mut i: usize = 0;
    while i < expires.len()
        invariant
            i <= expires.len(),
            kept.len() <= i,
            forall|j: int| 0 <= j < kept.len() ==> !is_expired(kept[j], now),
    {
        let expire = expires[i];
        if !(expire > 0 && expire <= now) {
            kept.push(expire);
        }
        i = i + 1;
    }

    kept
}

// ============================================================================
// STRING GUARD: one-character strings are ambiguous and rejected
// ============================================================================

/// Specification: whether a configured string of this length is acceptable.
/// Exactly length one is refused; empty strings pass through so the
/// required-value check can claim them.
#[spec]
pub fn string_length_ok(len: nat) -> bool {
    len != 1
}

/// Proof: the guard refuses only single characters
#[proof]
pub fn lemma_guard_refuses_only_one(len: nat)
    ensures
        !string_length_ok(len) <==> len == 1,
{
    // Direct from definition
}

/// Proof: everything two characters and longer is accepted
#[proof]
pub fn lemma_guard_accepts_real_strings(len: nat)
    requires
        len >= 2,
    ensures
        string_length_ok(len),
{
    // len >= 2 excludes len == 1
}

/// Executable guard with verified contract
#[exec]
pub fn string_length_ok_verified(len: usize) -> (result: bool)
    ensures
        result == string_length_ok(len as nat),
{
    len != 1
}

} // verus!
