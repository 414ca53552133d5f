//! Queue workers: the Stage 1 producer and the Stage 2 consumer.
//!
//! Both process one batch per call. A failure on one request is recorded
//! on that request and the batch moves on; only a failure of the database
//! itself ends the batch early.

pub mod consumer;
pub mod producer;

use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;

pub use consumer::MediaConsumer;
pub use producer::{ContentGenerator, ContentProducer, ScriptContentGenerator};

/// What happened to one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed,
    /// Claimed by someone else first.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} succeeded, {} failed, {} skipped)",
            self.processed, self.succeeded, self.failed, self.skipped
        )
    }
}
