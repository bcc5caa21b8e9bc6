//! Per-issue pipeline states and legal transition guards.
//!
//! Every issue walks the same linear chain of stages; each transition is
//! validated and recorded, so a finished issue's exact path (and where it
//! was abandoned) can be reconstructed from the log.

use std::fmt;
use std::time::Instant;

use thiserror::Error;

/// Stages one issue passes through on its way to a fix PR.
///
/// Every issue starts at `FetchEvent` and ends at exactly one of the three
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    /// Fetching the latest event payload from the error tracker.
    FetchEvent,
    /// Locating the crashing frame and its surrounding source lines.
    ExtractContext,
    /// Reading the offending file from the code host.
    ReadFile,
    /// Asking the model for an explanation and a replacement file.
    GenerateFix,
    /// Branching, committing, opening the pull request.
    Publish,
    /// Fix PR opened — terminal.
    Done,
    /// Abandoned without error because a stage came back empty — terminal.
    Skipped,
    /// A stage errored — terminal.
    Failed,
}

impl IssueState {
    /// Whether this state allows no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchEvent => write!(f, "FetchEvent"),
            Self::ExtractContext => write!(f, "ExtractContext"),
            Self::ReadFile => write!(f, "ReadFile"),
            Self::GenerateFix => write!(f, "GenerateFix"),
            Self::Publish => write!(f, "Publish"),
            Self::Done => write!(f, "Done"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal edges of the pipeline graph:
/// ```text
/// FetchEvent → ExtractContext
/// ExtractContext → ReadFile | Skipped
/// ReadFile → GenerateFix | Skipped
/// GenerateFix → Publish | Skipped
/// Publish → Done
/// ```
/// plus `Failed` from any non-terminal state. `Skipped` is not reachable
/// from `FetchEvent` or `Publish`: an error-tracker or publishing problem is
/// a failure, not a skip.
fn is_legal_transition(from: IssueState, to: IssueState) -> bool {
    use IssueState::*;

    // Any non-terminal state can fail.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (FetchEvent, ExtractContext)
            | (ExtractContext, ReadFile)
            | (ExtractContext, Skipped)
            | (ReadFile, GenerateFix)
            | (ReadFile, Skipped)
            | (GenerateFix, Publish)
            | (GenerateFix, Skipped)
            | (Publish, Done)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: IssueState,
    pub to: IssueState,
    /// Milliseconds since processing of the issue started.
    pub elapsed_ms: u64,
    /// Context for the transition, set on skips and failures.
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, Error)]
#[error("illegal issue state transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: IssueState,
    pub to: IssueState,
}

/// Tracks one issue's progress through the pipeline, enforces the legal
/// transition graph, and keeps a log of every step for diagnostics.
pub struct IssueStateMachine {
    current: IssueState,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl IssueStateMachine {
    /// A new machine starting at `FetchEvent`.
    pub fn new() -> Self {
        Self {
            current: IssueState::FetchEvent,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// The current state.
    pub fn current(&self) -> IssueState {
        self.current
    }

    /// The full transition log.
    #[cfg(test)]
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Attempt to advance to `to`, recording the transition.
    pub fn advance(&mut self, to: IssueState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %record.from,
            to = %record.to,
            elapsed_ms = record.elapsed_ms,
            reason = record.reason.as_deref().unwrap_or(""),
            "issue state transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Abandon the issue because a stage produced nothing to continue with.
    pub fn skip(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(IssueState::Skipped, Some(reason))
    }

    /// Abandon the issue because a stage errored. Legal from any
    /// non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(IssueState::Failed, Some(reason))
    }

    /// One-line history of the issue's path, for logs.
    pub fn summary(&self) -> String {
        let mut path = vec![IssueState::FetchEvent.to_string()];
        path.extend(self.transitions.iter().map(|t| t.to.to_string()));
        format!("{} ({}ms)", path.join(" → "), self.started_at.elapsed().as_millis())
    }
}

impl Default for IssueStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
