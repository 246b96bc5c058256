//! Converges `directory` resources.

use crate::core::resource::{Action, Kind, Resource, Spec};
use crate::provider::{chown, ownership_differs, parse_mode, Provider, Verdict};
use anyhow::{bail, Context};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Ensures a directory exists (recursively) with the declared ownership and mode, or that it is
/// absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryProvider;

struct Declared<'r> {
    path: &'r Path,
    owner: &'r Option<String>,
    group: &'r Option<String>,
    mode: &'r Option<String>,
}

fn declared(resource: &Resource) -> Declared<'_> {
    match &resource.spec {
        Spec::Directory {
            path,
            owner,
            group,
            mode,
        } => Declared {
            path: Path::new(path),
            owner,
            group,
            mode,
        },
        spec => panic!("directory provider got a non-directory spec: {spec:?}"),
    }
}

impl Provider for DirectoryProvider {
    fn kind(&self) -> Kind {
        Kind::Directory
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let decl = declared(resource);
        let metadata = match fs::symlink_metadata(decl.path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(match resource.action() {
                    Action::Delete => Verdict::Matches,
                    _ => Verdict::Absent,
                });
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to stat {}", decl.path.display()));
            }
        };

        if resource.action() == Action::Delete {
            return Ok(Verdict::Differs);
        }

        if !metadata.is_dir() {
            return Ok(Verdict::Differs);
        }
        if let Some(mode) = decl.mode {
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
                    fs::remove_dir_all(decl.path)
                        .with_context(|| format!("failed to remove {}", decl.path.display()))?;
                }
                Ok(())
            }
            Action::Create => {
                fs::create_dir_all(decl.path)
                    .with_context(|| format!("failed to create {}", decl.path.display()))?;
                if let Some(mode) = decl.mode {
                    fs::set_permissions(decl.path, fs::Permissions::from_mode(parse_mode(mode)?))
                        .with_context(|| format!("failed to chmod {}", decl.path.display()))?;
                }
                chown(decl.path, decl.owner, decl.group)
            }
            action => bail!("directory resources cannot {action}"),
        }
    }
}
