//! The run executor: the central component of steward.
//!
//! [run] walks a catalog's dependency graph in its deterministic order and drives each resource
//! through the converge state machine:
//!
//! ```text
//! PENDING -> GUARDED_OUT                      guard false; terminal, outcome skipped
//!         -> INSPECTING -> UP_TO_DATE         current state matches; no notifications
//!                       -> CONVERGING -> CONVERGED   apply succeeded; notifications fire
//!                                     -> FAILED      apply failed
//!                       -> FAILED             inspection failed
//! ```
//!
//! Run-level policy: on the first failure the walk halts and everything still pending is
//! reported as not run; partial convergence is reported, never silently swallowed. The opt-in
//! [RunOptions::continue_on_error] mode instead poisons only the failed resource's transitive
//! dependents and keeps converging independent branches.
//!
//! Provider errors never escape this module as process crashes; they are captured per resource
//! into the [Report]. Only graph-build-time configuration errors abort before a report exists.

mod notify;
pub mod report;

use crate::core::catalog::{self, Catalog};
use crate::core::graph::Graph;
use crate::core::resource::{Guard, Kind, Resource, Timing};
use crate::error::Error;
use crate::provider::{process, Provider, Registry, Verdict};
use chrono::Utc;
use log::{debug, error, info, warn};
use notify::NotificationBus;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[doc(inline)]
pub use report::{Outcome, Reaction, Report, Status};

/// Run-level switches.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Keep walking independent branches when a resource fails, instead of halting.
    pub continue_on_error: bool,

    /// Cooperative interruption flag, typically wired to SIGINT/SIGTERM by the binary.
    ///
    /// The executor checks it between resources: the in-flight provider call always completes
    /// (aborting mid-apply could leave the host in a torn state), then everything still pending
    /// is reported as not run and delayed notifications are dropped.
    pub interrupt: Arc<AtomicBool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            continue_on_error: false,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Converges the host to `catalog`, one resource at a time, in dependency order.
///
/// Returns a [Report] for every run that gets as far as touching resources. The error case is
/// reserved for configuration problems (duplicate or dangling declarations, a kind with no
/// provider, a dependency cycle), all of which are detected before any provider runs.
pub fn run(catalog: &Catalog, registry: &Registry, options: &RunOptions) -> Result<Report, Error> {
    let started = Utc::now();
    let resources = catalog.compile();
    catalog::validate(&resources)?;
    let graph = Graph::build(&resources)?;

    // Resolve every provider up front: a missing capability fails the run before any
    // inspection, never mid-walk.
    let mut providers: HashMap<Kind, &dyn Provider> = HashMap::new();
    for resource in &resources {
        let kind = resource.spec.kind();
        if let Entry::Vacant(entry) = providers.entry(kind) {
            entry.insert(registry.get(kind)?);
        }
    }

    let order = graph.order()?;
    info!(
        "converging catalog `{}`: {} resources",
        catalog.name,
        resources.len(),
    );

    let mut statuses: Vec<Option<Status>> = vec![None; resources.len()];
    let mut outcomes: Vec<Outcome> = Vec::with_capacity(resources.len());
    let mut reactions: Vec<Reaction> = Vec::new();
    let mut bus = NotificationBus::new();
    let mut poisoned = vec![false; resources.len()];
    let mut aborted = false;
    let mut interrupted = false;

    for &index in &order {
        let resource = &resources[index];
        let id = resource.id();

        if !interrupted && options.interrupt.load(Ordering::SeqCst) {
            warn!("interrupt received; leaving remaining resources unconverged");
            interrupted = true;
        }
        if aborted || interrupted {
            statuses[index] = Some(Status::NotRun);
            outcomes.push(Outcome::new(&id, Status::NotRun));
            continue;
        }
        if poisoned[index] {
            warn!("not running {id}: a dependency failed");
            statuses[index] = Some(Status::NotRun);
            outcomes.push(Outcome::new(&id, Status::NotRun));
            continue;
        }

        let provider = providers[&resource.spec.kind()];
        let outcome = converge(resource, provider);
        statuses[index] = Some(outcome.status);

        match outcome.status {
            Status::Failed => {
                if options.continue_on_error {
                    for dependent in graph.dependents(index) {
                        poisoned[dependent] = true;
                    }
                } else {
                    aborted = true;
                }
            }
            Status::Converged => {
                // A resource notifies its subscribers only on actual state change.
                for &(target, timing) in graph.notifications(index) {
                    match timing {
                        Timing::Immediate => {
                            let target = &resources[target];
                            let reaction =
                                fire(target, providers[&target.spec.kind()], Timing::Immediate);
                            let failed = !reaction.ok;
                            reactions.push(reaction);
                            if failed && !options.continue_on_error {
                                aborted = true;
                                break;
                            }
                        }
                        Timing::Delayed => {
                            bus.queue(target);
                        }
                    }
                }
            }
            _ => {}
        }
        outcomes.push(outcome);
    }

    // Delayed reactions flush only if the walk reached this point without aborting.
    if !aborted && !interrupted {
        for target in bus.drain() {
            match statuses[target] {
                Some(Status::Converged) | Some(Status::UpToDate) => {
                    let target = &resources[target];
                    reactions.push(fire(
                        target,
                        providers[&target.spec.kind()],
                        Timing::Delayed,
                    ));
                }
                status => debug!(
                    "dropping delayed notification for {}: target outcome was {status:?}",
                    graph.id(target),
                ),
            }
        }
    }

    let report = Report {
        catalog: catalog.name.clone(),
        started,
        finished: Utc::now(),
        interrupted,
        outcomes,
        reactions,
    };
    match report.success() {
        true => info!("{report}"),
        false => error!("{report}"),
    }
    Ok(report)
}

/// Drives one resource through the state machine and returns its outcome.
fn converge(resource: &Resource, provider: &dyn Provider) -> Outcome {
    let id = resource.id();

    if let Some(guard) = &resource.guard {
        match check_guard(guard) {
            Ok(true) => {}
            Ok(false) => {
                info!("skipping {id}: guard is false");
                return Outcome::new(&id, Status::Skipped);
            }
            // A guard that cannot be evaluated is a failure, not a silent skip.
            Err(error) => {
                error!("failed to evaluate guard for {id}: {error:#}");
                return Outcome::failed(&id, &error);
            }
        }
    }

    match provider.inspect(resource) {
        Ok(Verdict::Matches) => {
            debug!("{id} is up to date");
            Outcome::new(&id, Status::UpToDate)
        }
        Ok(verdict) => {
            info!(
                "converging {id} ({})",
                match verdict {
                    Verdict::Absent => "absent",
                    _ => "out of date",
                },
            );
            match provider.apply(resource) {
                Ok(()) => Outcome::new(&id, Status::Converged),
                Err(error) => {
                    error!("failed to converge {id}: {error:#}");
                    Outcome::failed(&id, &error)
                }
            }
        }
        Err(error) => {
            error!("failed to inspect {id}: {error:#}");
            Outcome::failed(&id, &error)
        }
    }
}

/// Runs a notification reaction: re-applies the target resource.
fn fire(resource: &Resource, provider: &dyn Provider, timing: Timing) -> Reaction {
    let id = resource.id();
    info!("firing {timing} notification for {id}");
    match provider.apply(resource) {
        Ok(()) => Reaction {
            target: id.to_string(),
            timing,
            ok: true,
            error: None,
        },
        Err(error) => {
            error!("notification reaction for {id} failed: {error:#}");
            Reaction {
                target: id.to_string(),
                timing,
                ok: false,
                error: Some(format!("{error:#}")),
            }
        }
    }
}

/// Evaluates a guard against the host as it is right now.
fn check_guard(guard: &Guard) -> anyhow::Result<bool> {
    match guard {
        Guard::FileExists(path) => Ok(Path::new(path).try_exists()?),
        Guard::FileMissing(path) => Ok(!Path::new(path).try_exists()?),
        Guard::CommandSucceeds(command) => process::succeeds(command),
    }
}
