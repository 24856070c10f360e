//! The ingest pipeline — watch, claim, submit, finalize.
//!
//! The filesystem is the system of record: a file's directory *is* its
//! pipeline position (Outgoing → Processing → Done/Error), and the atomic
//! rename into Processing is the only synchronization primitive between
//! workers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::parser::CarrierKind;

pub mod claim;
pub mod processor;
pub mod watcher;
pub mod worker;

pub use processor::{Processor, ProcessorDeps};
pub use watcher::spawn_watcher;
pub use worker::spawn_workers;

// ── Work item ───────────────────────────────────────────────────────

/// One shipping request file tracked through the pipeline.
///
/// Created when the watcher sees a stable new file; done once the file
/// rests in the done or error directory.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: Uuid,
    /// Path in the input directory at discovery time.
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
    /// Carrier API calls performed for this item so far.
    pub attempts: u32,
    pub state: WorkItemState,
}

impl WorkItem {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            discovered_at: Utc::now(),
            attempts: 0,
            state: WorkItemState::Discovered,
        }
    }

    /// File name for logs and terminal-directory naming.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Transition to a new state, enforcing the state machine in debug
    /// builds.
    pub fn advance(&mut self, to: WorkItemState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "invalid transition {} -> {}",
            self.state,
            to
        );
        tracing::debug!(item = %self.id, from = %self.state, to = %to, "State transition");
        self.state = to;
    }
}

/// Pipeline position of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    /// Seen by the watcher, not yet owned by a worker.
    Discovered,
    /// Exclusively owned — the file sits in the processing directory.
    Claimed,
    /// A carrier call is in flight.
    Submitting,
    /// Waiting out a backoff delay after a transient error.
    Retrying,
    /// Terminal: file in the done directory.
    Succeeded,
    /// Terminal: file in the error directory.
    Failed,
}

impl WorkItemState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkItemState) -> bool {
        use WorkItemState::*;

        matches!(
            (self, target),
            (Discovered, Claimed)
                | (Claimed, Submitting)
                | (Claimed, Failed)
                | (Submitting, Retrying)
                | (Submitting, Succeeded)
                | (Submitting, Failed)
                | (Retrying, Submitting)
                | (Retrying, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Claimed => "claimed",
            Self::Submitting => "submitting",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// A shipment that went all the way through submission.
#[derive(Debug, Clone)]
pub struct CompletedShipment {
    pub order_no: String,
    pub tracking_number: String,
    pub carrier: CarrierKind,
}

/// Result of submitting one work item.
#[derive(Debug)]
pub enum ProcessingOutcome {
    /// Every shipment in the file was submitted.
    Succeeded { shipments: Vec<CompletedShipment> },
    /// Terminal failure — classified reason for the operator.
    Failed { reason: String },
}
