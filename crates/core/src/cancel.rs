//! Cooperative cancellation for background loads
//!
//! A [`LoadGeneration`] hands out one [`LoadTicket`] per load. Starting a new
//! load cancels the previous ticket, and a completed load is only applied if
//! its ticket is still the current one; stale responses are discarded.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancelled flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent; every clone sees the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of which load a response belongs to
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    token: CancellationToken,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Background workers poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct LoadGeneration {
    current: u64,
    token: CancellationToken,
}

impl LoadGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new load, cancelling whichever one was in flight.
    pub fn begin(&mut self) -> LoadTicket {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.current += 1;
        LoadTicket {
            generation: self.current,
            token: self.token.clone(),
        }
    }

    /// Whether a response carrying `ticket` may still be applied.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.current && !ticket.is_cancelled()
    }

    /// Cancel the in-flight load without starting another.
    pub fn cancel(&mut self) {
        self.token.cancel();
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}
