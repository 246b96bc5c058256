//! Single-host configuration convergence.
//!
//! # YAML file types
//!
//! Catalog files and the secret store. A catalog declares the state a host should be in: an
//! ordered list of resources (directories, files, packages, supervised services, cron entries,
//! one-shot commands) plus the variables interpolated into them.
//!
//! # Program flow
//!
//! This section is meant specifically for developers writing code for steward. If you are using
//! steward to manage a host, you don't need to read this section.
//!
//! 1. The `steward` binary loads one or more catalog files, in order, into a single
//!    [core::Catalog] and resolves its secret references through [secrets::SecretStore].
//!
//! 2. [run::run] compiles the catalog (variable interpolation), validates it, builds the
//!    dependency graph ([core::Graph]) and its deterministic execution order, and resolves a
//!    [provider::Provider] for every declared resource kind. Any problem up to this point is a
//!    configuration error: the run fails before anything touches the host.
//!
//! 3. The executor walks the order. For each resource it evaluates the guard, asks the provider
//!    to inspect current state, and applies the converge action only when current and desired
//!    state differ. Resources that change state notify their subscribers: immediate reactions
//!    run inline, delayed ones run once, deduplicated, after the walk.
//!
//! 4. The per-resource outcomes are collected into a [run::Report], which maps to the process
//!    exit status.

pub mod config;
pub mod core;
pub mod error;
pub mod provider;
pub mod run;
pub mod secrets;

#[doc(inline)]
pub use error::Error;

#[doc(inline)]
pub use run::run;
