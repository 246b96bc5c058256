//! Configuration errors: everything that fails a run before any resource is touched.
//!
//! Provider errors (a failed inspection or a failed apply) are deliberately *not* part of this
//! enum. They are captured per resource into the [Report] so that a partially converged run is
//! always reported rather than surfaced as a process error. Only problems with the declared
//! configuration itself, which make the whole run unrunnable, belong here.
//!
//! [Report]: crate::run::Report

use crate::core::resource::{Action, Kind, ResourceId};
use thiserror::Error;

/// An error in the declared configuration, detected before execution begins.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// A declared resource's kind has no provider in the registry.
    #[error("no provider registered for resource kind `{0}`")]
    UnknownProvider(Kind),

    /// The dependency graph has no valid execution order.
    ///
    /// Names every resource that could not be placed in the order: the members of the cycle plus
    /// anything downstream of it.
    #[error("dependency cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// Two resources share the same `(kind, name)` identity.
    #[error("duplicate resource `{0}`")]
    DuplicateResource(ResourceId),

    /// A `require`, `notify`, or `subscribe` entry names a resource that is not in the catalog.
    #[error("resource `{resource}` references unknown resource `{reference}`")]
    UnknownReference {
        resource: ResourceId,
        reference: String,
    },

    /// A reference could not be parsed as `<kind> <name>`.
    #[error("resource `{resource}`: malformed reference `{reference}` (expected `<kind> <name>`)")]
    MalformedReference {
        resource: ResourceId,
        reference: String,
    },

    /// The declared converge action is not one the resource's kind can perform.
    #[error("action `{action}` is not supported by {kind} resources")]
    InvalidAction { kind: Kind, action: Action },
}
