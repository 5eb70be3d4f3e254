//! Operation context carrying cancellation and deadlines.
//!
//! Every long operation accepts an `OpContext`. Ingest workers hold the
//! token side and cancel in-flight jobs; queries attach a deadline so the
//! retriever can stop before the expensive rerank/MMR stages.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation signal plus optional deadline for one operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OpContext {
    /// Context with no deadline and its own cancellation token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Attach a deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The underlying token, for wiring into select loops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation of everything holding this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the operation was cancelled or ran out of time.
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled("operation cancelled".into()));
        }
        if self.deadline_exceeded() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}
