//! Outstanding HTTP Call Table
//!
//! Correlates the token returned by `proxy_http_call` with the context that
//! issued it, so the completion callback reaches that context exactly once.
//! An entry leaves the table either on completion or when its owner is torn
//! down, never both.

use std::collections::HashMap;

/// Pending dispatch record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    /// Token returned by the host
    pub token: u32,
    /// Context awaiting the response
    pub context_id: u32,
}

/// Outstanding dispatches keyed by token
#[derive(Debug, Default)]
pub struct Callouts {
    pending: HashMap<u32, PendingCall>,
}

impl Callouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch; refuses a token that is still outstanding
    pub fn register(&mut self, token: u32, context_id: u32) -> bool {
        if self.pending.contains_key(&token) {
            return false;
        }
        self.pending.insert(token, PendingCall { token, context_id });
        true
    }

    /// Consume the record for a completed dispatch
    pub fn complete(&mut self, token: u32) -> Option<PendingCall> {
        self.pending.remove(&token)
    }

    /// Drop every outstanding dispatch of a context, returning their tokens
    pub fn abandon(&mut self, context_id: u32) -> Vec<u32> {
        let mut tokens: Vec<u32> = self
            .pending
            .values()
            .filter(|call| call.context_id == context_id)
            .map(|call| call.token)
            .collect();
        tokens.sort_unstable();
        for token in &tokens {
            self.pending.remove(token);
        }
        tokens
    }

    /// Number of outstanding dispatches for a context
    pub fn pending_for(&self, context_id: u32) -> usize {
        self.pending
            .values()
            .filter(|call| call.context_id == context_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
