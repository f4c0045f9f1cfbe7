//! Research Job Status and Display Phase
//!
//! [`JobStatus`] is the authoritative lifecycle value reported by the
//! backend. [`ResearchPhase`] is a coarser, UI-facing grouping derived from
//! it and used purely for display.
//!
//! # Ordering
//!
//! ```text
//! pending < decomposing < retrieving < analyzing < synthesizing < {complete, error, cancelled}
//! ```
//!
//! The three terminal statuses share the top rank; once one is reached the
//! job never moves again.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a deep research job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not yet started (assigned locally before the first poll)
    Pending,
    /// Breaking the query into sub-questions
    Decomposing,
    /// Retrieving documents for sub-questions
    Retrieving,
    /// Analyzing retrieved material
    Analyzing,
    /// Writing the final answer
    Synthesizing,
    /// Finished
    Complete,
    /// Failed on the server
    Error,
    /// Cancelled (by the user or the server)
    Cancelled,
}

impl JobStatus {
    /// Parse a wire status string
    ///
    /// Returns `None` for values outside the known set.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "decomposing" => Some(Self::Decomposing),
            "retrieving" => Some(Self::Retrieving),
            "analyzing" => Some(Self::Analyzing),
            "synthesizing" => Some(Self::Synthesizing),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Decomposing => "decomposing",
            Self::Retrieving => "retrieving",
            Self::Analyzing => "analyzing",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Decomposing => "Decomposing query",
            Self::Retrieving => "Retrieving sources",
            Self::Analyzing => "Analyzing findings",
            Self::Synthesizing => "Synthesizing answer",
            Self::Complete => "Complete",
            Self::Error => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Position in the lifecycle partial order
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Decomposing => 1,
            Self::Retrieving => 2,
            Self::Analyzing => 3,
            Self::Synthesizing => 4,
            Self::Complete | Self::Error | Self::Cancelled => 5,
        }
    }

    /// Whether this status ends the job (complete, error, or cancelled)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` respects the lifecycle order
    #[must_use]
    pub fn can_advance_to(&self, next: Self) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    /// Display phase for this status
    #[must_use]
    pub fn phase(&self) -> ResearchPhase {
        match self {
            Self::Pending | Self::Decomposing => ResearchPhase::Plan,
            Self::Retrieving => ResearchPhase::Search,
            Self::Analyzing => ResearchPhase::Analyze,
            Self::Synthesizing => ResearchPhase::Synthesize,
            Self::Complete => ResearchPhase::Complete,
            Self::Error => ResearchPhase::Error,
            Self::Cancelled => ResearchPhase::Cancelled,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// UI-facing phase of a research job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchPhase {
    /// Planning (default for anything unrecognized)
    #[default]
    Plan,
    /// Searching the knowledge base
    Search,
    /// Analyzing results
    Analyze,
    /// Writing the answer
    Synthesize,
    /// Done
    Complete,
    /// Failed
    Error,
    /// Cancelled
    Cancelled,
}

impl ResearchPhase {
    /// Phase for a raw wire status string
    ///
    /// Total: unknown values fall back to the default phase.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        JobStatus::parse(status).map_or_else(Self::default, |s| s.phase())
    }

    /// Parse a phase name as sent in streamed progress payloads
    ///
    /// Accepts both phase names (`search`) and status names (`retrieving`).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "plan" | "planning" => Self::Plan,
            "search" | "searching" => Self::Search,
            "analyze" | "analysis" => Self::Analyze,
            "synthesize" | "synthesis" => Self::Synthesize,
            "complete" | "done" => Self::Complete,
            "error" | "failed" => Self::Error,
            "cancelled" | "canceled" => Self::Cancelled,
            other => Self::from_status(other),
        }
    }

    /// Short label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Search => "search",
            Self::Analyze => "analyze",
            Self::Synthesize => "synthesize",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Position in display order; terminal phases share the top rank
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Plan => 0,
            Self::Search => 1,
            Self::Analyze => 2,
            Self::Synthesize => 3,
            Self::Complete | Self::Error | Self::Cancelled => 4,
        }
    }

    /// Whether this phase is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
