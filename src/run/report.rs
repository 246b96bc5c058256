//! Reports the outcome of each resource in a run.

use crate::core::resource::{ResourceId, Timing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The terminal state of one resource within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The guard evaluated false; the resource was skipped entirely. The provider was never
    /// consulted and no notifications fired.
    Skipped,

    /// Inspection found current state already matching desired state; no action taken, no
    /// notifications fired.
    UpToDate,

    /// The provider applied the converge action successfully. Notifications fired.
    Converged,

    /// The guard, inspection, or apply failed; the error is recorded alongside.
    Failed,

    /// The resource was never reached: the run halted, was interrupted, or (in
    /// continue-on-error mode) a dependency failed.
    NotRun,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Status::*;
        f.pad(match self {
            Skipped => "skipped",
            UpToDate => "up-to-date",
            Converged => "converged",
            Failed => "failed",
            NotRun => "not-run",
        })
    }
}

/// One resource's outcome.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Outcome {
    /// The resource's rendered identity, `<kind> <name>`.
    pub resource: String,

    pub status: Status,

    /// The rendered error chain, present only for [Status::Failed].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn new(id: &ResourceId, status: Status) -> Self {
        Outcome {
            resource: id.to_string(),
            status,
            error: None,
        }
    }

    pub fn failed(id: &ResourceId, error: &anyhow::Error) -> Self {
        Outcome {
            resource: id.to_string(),
            status: Status::Failed,
            error: Some(format!("{error:#}")),
        }
    }
}

/// One notification reaction that fired (or tried to).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Reaction {
    /// The reacting resource's rendered identity.
    pub target: String,

    pub timing: Timing,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The aggregated record of one run: per-resource outcomes in execution order, the notification
/// reactions that fired, and run timestamps.
///
/// Owned exclusively by the executor while the run is in flight; read-only afterwards.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Report {
    /// The catalog this run converged.
    pub catalog: String,

    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,

    /// Whether a termination signal cut the run short. Resources after the in-flight one are
    /// [Status::NotRun].
    pub interrupted: bool,

    /// Per-resource outcomes, in execution order.
    pub outcomes: Vec<Outcome>,

    /// Reactions in firing order: immediates inline, delayed after the walk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
}

impl Report {
    /// A run succeeds only if nothing failed: no failed resource, no failed reaction, and no
    /// interruption.
    pub fn success(&self) -> bool {
        !self.interrupted
            && self
                .outcomes
                .iter()
                .all(|outcome| outcome.status != Status::Failed)
            && self.reactions.iter().all(|reaction| reaction.ok)
    }

    /// The process exit status this run maps to.
    pub fn exit_code(&self) -> i32 {
        match self.success() {
            true => 0,
            false => 1,
        }
    }

    /// How many resources finished with `status`.
    pub fn count(&self, status: Status) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{:<10} {}", outcome.status, outcome.resource)?;
            if let Some(error) = &outcome.error {
                for line in error.lines() {
                    writeln!(f, "    {line}")?;
                }
            }
        }
        for reaction in &self.reactions {
            match &reaction.error {
                None => writeln!(f, "notified   {} ({})", reaction.target, reaction.timing)?,
                Some(error) => {
                    writeln!(f, "notify-err {} ({})", reaction.target, reaction.timing)?;
                    for line in error.lines() {
                        writeln!(f, "    {line}")?;
                    }
                }
            }
        }

        write!(
            f,
            "{}: {} converged, {} up-to-date, {} skipped, {} failed, {} not-run",
            self.catalog,
            self.count(Status::Converged),
            self.count(Status::UpToDate),
            self.count(Status::Skipped),
            self.count(Status::Failed),
            self.count(Status::NotRun),
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}
