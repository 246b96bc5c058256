//! Converges `service` resources: programs managed by a process supervisor.

use crate::core::resource::{Action, Kind, Resource, Spec};
use crate::provider::{process, Provider, Verdict};
use anyhow::{bail, Context};
use std::fs;
use std::path::PathBuf;

/// Manages one supervisor program per resource: a rendered stanza under the supervisor's
/// drop-in directory plus the program's run state via `supervisorctl`.
///
/// Desired-vs-current equality is byte equality on the rendered stanza, the same
/// checksum-compare idiom that drives restart-on-change: a stanza that renders identically and
/// a running program is up to date; anything else converges.
#[derive(Clone, Debug)]
pub struct ServiceProvider {
    conf_dir: PathBuf,
}

impl ServiceProvider {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        ServiceProvider {
            conf_dir: conf_dir.into(),
        }
    }

    fn stanza_path(&self, resource: &Resource) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", resource.name))
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        ServiceProvider::new("/etc/supervisor/conf.d")
    }
}

/// Renders the supervisor program stanza for a declaration. Byte-deterministic so inspection
/// can compare without parsing.
fn render(resource: &Resource) -> String {
    let (
        command,
        directory,
        user,
        numprocs,
        autostart,
        autorestart,
        environment,
        stdout_logfile,
        stderr_logfile,
    ) = match &resource.spec {
        Spec::Service {
            command,
            directory,
            user,
            numprocs,
            autostart,
            autorestart,
            environment,
            stdout_logfile,
            stderr_logfile,
        } => (
            command,
            directory,
            user,
            *numprocs,
            *autostart,
            *autorestart,
            environment,
            stdout_logfile,
            stderr_logfile,
        ),
        spec => panic!("service provider got a non-service spec: {spec:?}"),
    };

    let mut stanza = format!("[program:{}]\ncommand={command}\n", resource.name);
    if let Some(directory) = directory {
        stanza.push_str(&format!("directory={directory}\n"));
    }
    if let Some(user) = user {
        stanza.push_str(&format!("user={user}\n"));
    }
    stanza.push_str(&format!("numprocs={numprocs}\n"));
    if numprocs > 1 {
        stanza.push_str("process_name=%(program_name)s_%(process_num)02d\n");
    }
    stanza.push_str(&format!("autostart={autostart}\n"));
    stanza.push_str(&format!("autorestart={autorestart}\n"));
    if let Some(stdout_logfile) = stdout_logfile {
        stanza.push_str(&format!("stdout_logfile={stdout_logfile}\n"));
    }
    if let Some(stderr_logfile) = stderr_logfile {
        stanza.push_str(&format!("stderr_logfile={stderr_logfile}\n"));
    }
    if !environment.is_empty() {
        let pairs: Vec<String> = environment
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\""))
            .collect();
        stanza.push_str(&format!("environment={}\n", pairs.join(",")));
    }
    stanza
}

/// Asks the supervisor whether every process of the program is running.
fn running(name: &str) -> anyhow::Result<bool> {
    // supervisorctl exits non-zero for stopped programs; only the text is reliable.
    let output = process::output("supervisorctl", &["status", name])?;
    let text = String::from_utf8_lossy(&output.stdout);
    let mut any = false;
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        any = true;
        if !line.contains("RUNNING") {
            return Ok(false);
        }
    }
    Ok(any)
}

impl Provider for ServiceProvider {
    fn kind(&self) -> Kind {
        Kind::Service
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let path = self.stanza_path(resource);
        let current = process::read_if_present(&path)?;

        match resource.action() {
            Action::Delete => Ok(match current {
                Some(_) => Verdict::Differs,
                None => Verdict::Matches,
            }),
            Action::Enable => match current {
                None => Ok(Verdict::Absent),
                Some(current) if current != render(resource).as_bytes() => Ok(Verdict::Differs),
                Some(_) if running(&resource.name)? => Ok(Verdict::Matches),
                Some(_) => Ok(Verdict::Differs),
            },
            Action::Start => {
                if running(&resource.name)? {
                    Ok(Verdict::Matches)
                } else if current.is_some() {
                    Ok(Verdict::Differs)
                } else {
                    Ok(Verdict::Absent)
                }
            }
            Action::Stop => Ok(match running(&resource.name)? {
                true => Verdict::Differs,
                false => Verdict::Matches,
            }),
            action => bail!("service resources cannot {action}"),
        }
    }

    fn apply(&self, resource: &Resource) -> anyhow::Result<()> {
        let name = resource.name.as_str();
        match resource.action() {
            Action::Enable => {
                let path = self.stanza_path(resource);
                let desired = render(resource);
                let current = process::read_if_present(&path)?;

                if current.as_deref() != Some(desired.as_bytes()) {
                    process::replace_file(&path, desired.as_bytes())?;
                    // update reloads changed stanzas and (re)starts autostart programs.
                    process::run("supervisorctl", &["update"])
                } else if running(name)? {
                    // Stanza already converged: this is the restart-on-notify path.
                    process::run("supervisorctl", &["restart", name])
                } else {
                    process::run("supervisorctl", &["start", name])
                }
            }
            Action::Start => {
                if running(name)? {
                    return Ok(());
                }
                process::run("supervisorctl", &["start", name])
            }
            Action::Stop => {
                if !running(name)? {
                    return Ok(());
                }
                process::run("supervisorctl", &["stop", name])
            }
            Action::Delete => {
                let path = self.stanza_path(resource);
                if running(name)? {
                    process::run("supervisorctl", &["stop", name])?;
                }
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                }
                process::run("supervisorctl", &["update"])
            }
            action => bail!("service resources cannot {action}"),
        }
    }
}
