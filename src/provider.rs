//! The provider contract: pluggable strategies that inspect and converge one resource kind.
//!
//! Providers are stateless strategy objects, one per [Kind], shared read-only across every
//! resource of that kind within a run. The engine only ever talks to them through [Provider];
//! everything kind-specific (file paths, package-manager invocations, supervisor stanza fields)
//! stays behind that trait.

pub mod command;
pub mod cron;
pub mod directory;
pub mod file;
pub mod package;
pub mod process;
pub mod service;

use crate::core::resource::{Kind, Resource};
use crate::error::Error;
use anyhow::Context;
use std::collections::HashMap;

#[doc(inline)]
pub use command::CommandProvider;
#[doc(inline)]
pub use cron::CronProvider;
#[doc(inline)]
pub use directory::DirectoryProvider;
#[doc(inline)]
pub use file::FileProvider;
#[doc(inline)]
pub use package::PackageProvider;
#[doc(inline)]
pub use service::ServiceProvider;

/// The result of inspecting a resource: how the host's current state compares to the declared
/// desired state, including the declared converge action. For a `delete` action, for instance,
/// a missing file *matches*.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Current state already satisfies the declaration; nothing to do.
    Matches,

    /// The subject exists but deviates from the declaration.
    Differs,

    /// The subject does not exist yet.
    Absent,
}

/// A strategy that knows how to inspect and converge one resource [Kind].
///
/// # Contract
///
/// * [Provider::inspect] must be free of side effects and idempotent on its own: calling it
///   repeatedly without an intervening [Provider::apply] must always yield the same verdict.
///   This is what lets the engine re-run safely.
/// * [Provider::apply] brings the host to the declared state. It is also the notification
///   reaction: re-applying an already-converged resource must be well-defined (for a service,
///   that is the restart path).
/// * Errors never escape as panics; they are captured per resource into the run report.
/// * Calls that spawn host processes must bound their wait; see [process::DEFAULT_TIMEOUT].
pub trait Provider {
    /// The resource kind this provider converges.
    fn kind(&self) -> Kind;

    /// Queries current host state and compares it to the declaration.
    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict>;

    /// Performs the minimal action that reconciles current state with the declaration.
    fn apply(&self, resource: &Resource) -> anyhow::Result<()>;
}

/// Maps resource kinds to the providers that converge them.
///
/// Resolution for every declared resource happens before the walk starts; a kind without a
/// provider fails the run before anything touches the host.
#[derive(Default)]
pub struct Registry {
    providers: HashMap<Kind, Box<dyn Provider>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Creates a registry with every built-in provider registered under its default paths.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        registry.register(Box::new(DirectoryProvider));
        registry.register(Box::new(FileProvider));
        registry.register(Box::new(PackageProvider));
        registry.register(Box::new(ServiceProvider::default()));
        registry.register(Box::new(CronProvider::default()));
        registry.register(Box::new(CommandProvider));
        registry
    }

    /// Registers `provider` under its own kind, replacing any previous provider for that kind.
    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Resolves the provider for `kind`.
    pub fn get(&self, kind: Kind) -> Result<&dyn Provider, Error> {
        self.providers
            .get(&kind)
            .map(|provider| &**provider)
            .ok_or(Error::UnknownProvider(kind))
    }
}

/// Parses an octal permission string such as `"0755"`.
pub(crate) fn parse_mode(mode: &str) -> anyhow::Result<u32> {
    u32::from_str_radix(mode, 8).with_context(|| format!("invalid mode `{mode}`"))
}

/// Returns whether the declared owner or group differs from the path's current ownership.
/// Undeclared fields always match.
pub(crate) fn ownership_differs(
    path: &std::path::Path,
    owner: &Option<String>,
    group: &Option<String>,
) -> anyhow::Result<bool> {
    if owner.is_none() && group.is_none() {
        return Ok(false);
    }

    let rendered = path.to_string_lossy();
    let output = process::output("stat", &["-c", "%U:%G", rendered.as_ref()])?;
    if !output.status.success() {
        anyhow::bail!("failed to stat {}", path.display());
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let (current_owner, current_group) = text.trim().split_once(':').unwrap_or((text.trim(), ""));

    Ok(owner.as_deref().is_some_and(|o| o != current_owner)
        || group.as_deref().is_some_and(|g| g != current_group))
}

/// Applies the declared owner/group to a path. A no-op when neither is declared.
pub(crate) fn chown(
    path: &std::path::Path,
    owner: &Option<String>,
    group: &Option<String>,
) -> anyhow::Result<()> {
    let spec = match (owner, group) {
        (None, None) => return Ok(()),
        (Some(owner), None) => owner.clone(),
        (None, Some(group)) => format!(":{group}"),
        (Some(owner), Some(group)) => format!("{owner}:{group}"),
    };
    let rendered = path.to_string_lossy();
    process::run("chown", &[spec.as_str(), rendered.as_ref()])
}
