#![forbid(unsafe_code)]

//! Identifier generation for on-page objects and synchronous requests.
//!
//! Object ids are short lowercase strings used as JavaScript variable names
//! (`abcdefgh = new Chart(...)`), so they must never repeat within a process.
//! They are opaque: callers must not guess or reconstruct them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{BridgeError, Result};

/// Default id length (26^8 ≈ 2·10¹¹ possible ids).
pub const DEFAULT_ID_LEN: usize = 8;

/// Default retry cap before declaring the id space exhausted.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Correlation id attached to a synchronous evaluate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct GenState {
    rng: StdRng,
    issued: HashSet<String>,
}

/// Collision-checked generator of lowercase alphabetic identifiers.
///
/// One instance lives for the whole controller and is shared (by `Arc`)
/// with every chart and subchart.
pub struct IdGenerator {
    state: Mutex<GenState>,
    len: usize,
    max_attempts: u32,
    next_request: AtomicU64,
}

impl IdGenerator {
    /// Create a generator seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a deterministic generator (tests, replays).
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(GenState {
                rng,
                issued: HashSet::new(),
            }),
            len: DEFAULT_ID_LEN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_request: AtomicU64::new(1),
        }
    }

    /// Override id length. Lengths below 1 are clamped to 1.
    #[must_use]
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len.max(1);
        self
    }

    /// Override the collision retry cap.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Produce an id never issued before by this generator.
    pub fn generate(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for attempt in 1..=self.max_attempts {
            let candidate: String = (0..self.len)
                .map(|_| char::from(state.rng.gen_range(b'a'..=b'z')))
                .collect();
            if state.issued.insert(candidate.clone()) {
                if attempt > 1 {
                    tracing::debug!(attempt, id = %candidate, "id collision resolved");
                }
                return Ok(candidate);
            }
        }
        tracing::error!(
            attempts = self.max_attempts,
            issued = state.issued.len(),
            "identifier space exhausted"
        );
        Err(BridgeError::IdSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Whether `id` was issued by this generator.
    #[must_use]
    pub fn was_issued(&self, id: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.issued.contains(id)
    }

    /// Number of ids issued so far.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.issued.len()
    }

    /// Next correlation id for a synchronous request. Never returns 0.
    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("len", &self.len)
            .field("max_attempts", &self.max_attempts)
            .field("issued", &self.issued_count())
            .finish()
    }
}
