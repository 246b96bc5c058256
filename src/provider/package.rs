//! Converges `package` resources through the system package manager (apt/dpkg).

use crate::core::resource::{Action, Kind, Resource, Spec};
use crate::provider::{process, Provider, Verdict};
use anyhow::bail;

/// Ensures a package is installed (optionally at an exact version) or removed.
///
/// Inspection queries the dpkg database; convergence runs `apt-get`. Both run with the bounded
/// wait from [process].
#[derive(Clone, Copy, Debug, Default)]
pub struct PackageProvider;

fn declared(resource: &Resource) -> (&str, Option<&str>) {
    match &resource.spec {
        Spec::Package { package, version } => (
            package.as_deref().unwrap_or(&resource.name),
            version.as_deref(),
        ),
        spec => panic!("package provider got a non-package spec: {spec:?}"),
    }
}

/// Queries the installed version of `package`, or [None] if it is not installed.
fn installed_version(package: &str) -> anyhow::Result<Option<String>> {
    let output = process::output(
        "dpkg-query",
        &["-W", "-f", "${db:Status-Status} ${Version}", package],
    )?;
    // dpkg-query exits non-zero for packages it has never heard of.
    if !output.status.success() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&output.stdout);
    match text.trim().split_once(' ') {
        Some(("installed", version)) => Ok(Some(version.to_owned())),
        _ => Ok(None),
    }
}

impl Provider for PackageProvider {
    fn kind(&self) -> Kind {
        Kind::Package
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let (package, version) = declared(resource);
        let installed = installed_version(package)?;

        if resource.action() == Action::Delete {
            return Ok(match installed {
                Some(_) => Verdict::Differs,
                None => Verdict::Matches,
            });
        }

        Ok(match (installed, version) {
            (None, _) => Verdict::Absent,
            (Some(_), None) => Verdict::Matches,
            (Some(installed), Some(declared)) if installed == declared => Verdict::Matches,
            (Some(_), Some(_)) => Verdict::Differs,
        })
    }

    fn apply(&self, resource: &Resource) -> anyhow::Result<()> {
        let (package, version) = declared(resource);
        match resource.action() {
            Action::Delete => process::run("apt-get", &["remove", "-y", package]),
            Action::Create => {
                let spec = match version {
                    Some(version) => format!("{package}={version}"),
                    None => package.to_owned(),
                };
                process::run("apt-get", &["install", "-y", &spec])
            }
            action => bail!("package resources cannot {action}"),
        }
    }
}
