//! Converges `cron` resources as drop-in files under the system cron directory.

use crate::core::resource::{Action, Kind, Resource, Spec};
use crate::provider::{process, Provider, Verdict};
use anyhow::{bail, Context};
use std::fs;
use std::path::PathBuf;

/// Manages one scheduled job per resource as a file in `/etc/cron.d`.
///
/// A drop-in file is trivially idempotent to inspect (byte equality) and atomic to replace,
/// which is why steward manages cron this way rather than editing user crontabs in place.
#[derive(Clone, Debug)]
pub struct CronProvider {
    cron_dir: PathBuf,
}

impl CronProvider {
    pub fn new(cron_dir: impl Into<PathBuf>) -> Self {
        CronProvider {
            cron_dir: cron_dir.into(),
        }
    }

    fn entry_path(&self, resource: &Resource) -> PathBuf {
        self.cron_dir.join(&resource.name)
    }
}

impl Default for CronProvider {
    fn default() -> Self {
        CronProvider::new("/etc/cron.d")
    }
}

/// Renders the drop-in file for a declaration. Byte-deterministic: the same declaration always
/// renders identically, so inspection can compare without parsing.
fn render(resource: &Resource) -> String {
    match &resource.spec {
        Spec::Cron {
            command,
            user,
            minute,
            hour,
            day,
            month,
            weekday,
        } => {
            format!(
                "# Managed by steward: cron {}\n{minute} {hour} {day} {month} {weekday} {user} {command}\n",
                resource.name,
            )
        }
        spec => panic!("cron provider got a non-cron spec: {spec:?}"),
    }
}

impl Provider for CronProvider {
    fn kind(&self) -> Kind {
        Kind::Cron
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let path = self.entry_path(resource);
        let current = process::read_if_present(&path)?;

        if resource.action() == Action::Delete {
            return Ok(match current {
                Some(_) => Verdict::Differs,
                None => Verdict::Matches,
            });
        }

        Ok(match current {
            None => Verdict::Absent,
            Some(current) if current == render(resource).as_bytes() => Verdict::Matches,
            Some(_) => Verdict::Differs,
        })
    }

    fn apply(&self, resource: &Resource) -> anyhow::Result<()> {
        let path = self.entry_path(resource);
        match resource.action() {
            Action::Delete => {
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                }
                Ok(())
            }
            Action::Create => process::replace_file(&path, render(resource).as_bytes()),
            action => bail!("cron resources cannot {action}"),
        }
    }
}
