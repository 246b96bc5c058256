//! Converges `file` resources.

use crate::core::resource::{Action, Kind, Resource, Spec};
use crate::provider::{chown, ownership_differs, parse_mode, process, Provider, Verdict};
use anyhow::{bail, Context};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Ensures a file exists with exactly the declared content, ownership, and mode, or that it is
/// absent. Content convergence replaces the file atomically, so a failed apply leaves either
/// the old file or the new one.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileProvider;

struct Declared<'r> {
    path: &'r Path,
    content: &'r str,
    owner: &'r Option<String>,
    group: &'r Option<String>,
    mode: &'r Option<String>,
}

fn declared(resource: &Resource) -> Declared<'_> {
    match &resource.spec {
        Spec::File {
            path,
            content,
            owner,
            group,
            mode,
        } => Declared {
            path: Path::new(path),
            content,
            owner,
            group,
            mode,
        },
        spec => panic!("file provider got a non-file spec: {spec:?}"),
    }
}

impl Provider for FileProvider {
    fn kind(&self) -> Kind {
        Kind::File
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let decl = declared(resource);
        let current = process::read_if_present(decl.path)?;

        if resource.action() == Action::Delete {
            return Ok(match current {
                Some(_) => Verdict::Differs,
                None => Verdict::Matches,
            });
        }

        let current = match current {
            Some(current) => current,
            None => return Ok(Verdict::Absent),
        };

        if current != decl.content.as_bytes() {
            return Ok(Verdict::Differs);
        }
        if let Some(mode) = decl.mode {
            let metadata = fs::metadata(decl.path)
                .with_context(|| format!("failed to stat {}", decl.path.display()))?;
            if metadata.permissions().mode() & 0o7777 != parse_mode(mode)? {
                return Ok(Verdict::Differs);
            }
        }
        if ownership_differs(decl.path, decl.owner, decl.group)? {
            return Ok(Verdict::Differs);
        }
        Ok(Verdict::Matches)
    }

    fn apply(&self, resource: &Resource) -> anyhow::Result<()> {
        let decl = declared(resource);
        match resource.action() {
            Action::Delete => {
                if decl.path.exists() {
                    fs::remove_file(decl.path)
                        .with_context(|| format!("failed to remove {}", decl.path.display()))?;
                }
                Ok(())
            }
            Action::Create => {
                process::replace_file(decl.path, decl.content.as_bytes())?;
                if let Some(mode) = decl.mode {
                    fs::set_permissions(decl.path, fs::Permissions::from_mode(parse_mode(mode)?))
                        .with_context(|| format!("failed to chmod {}", decl.path.display()))?;
                }
                chown(decl.path, decl.owner, decl.group)
            }
            action => bail!("file resources cannot {action}"),
        }
    }
}
