//! Converges `command` resources: one-shot actions such as database migrations and
//! application CLI calls.

use crate::core::resource::{Kind, Resource, Spec};
use crate::provider::{process, Provider, Verdict};
use anyhow::{bail, Context};
use indexmap::IndexMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Runs a declared command line once per converge.
///
/// Idempotency comes from the `creates` attribute: when the named path already exists the
/// command is considered converged and never re-run. A declaration without `creates` converges
/// on every run, which is occasionally what you want (migrations that are themselves
/// idempotent) but is worth a guard otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandProvider;

struct Declared<'r> {
    command: &'r str,
    cwd: Option<&'r str>,
    user: Option<&'r str>,
    environment: &'r IndexMap<String, String>,
    creates: Option<&'r str>,
    timeout: Duration,
}

fn declared(resource: &Resource) -> Declared<'_> {
    match &resource.spec {
        Spec::Command {
            command,
            cwd,
            user,
            environment,
            creates,
            timeout_secs,
        } => Declared {
            command,
            cwd: cwd.as_deref(),
            user: user.as_deref(),
            environment,
            creates: creates.as_deref(),
            timeout: timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(process::DEFAULT_TIMEOUT),
        },
        spec => panic!("command provider got a non-command spec: {spec:?}"),
    }
}

impl Provider for CommandProvider {
    fn kind(&self) -> Kind {
        Kind::Command
    }

    fn inspect(&self, resource: &Resource) -> anyhow::Result<Verdict> {
        let decl = declared(resource);
        match decl.creates {
            Some(creates) if Path::new(creates).try_exists()? => Ok(Verdict::Matches),
            _ => Ok(Verdict::Absent),
        }
    }

    fn apply(&self, resource: &Resource) -> anyhow::Result<()> {
        let decl = declared(resource);

        let mut argv = shlex::split(decl.command)
            .with_context(|| format!("failed to parse command line: {}", decl.command))?;
        if argv.is_empty() {
            bail!("empty command line");
        }
        // Run as another user the way an operator would: through sudo. The environment is
        // passed through explicitly, since sudo resets it.
        if let Some(user) = decl.user {
            let mut wrapped = vec![
                "sudo".to_owned(),
                "--preserve-env".to_owned(),
                "-u".to_owned(),
                user.to_owned(),
            ];
            wrapped.append(&mut argv);
            argv = wrapped;
        }

        let rendered = process::render(&argv[0], &argv[1..]);
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        if let Some(cwd) = decl.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in decl.environment {
            command.env(key, value);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to start command: {rendered}"))?;
        let status = process::wait_with_timeout(child, decl.timeout, &rendered)?;

        if !status.success() {
            let error = match status.code() {
                Some(i) => format!("exit code {i}"),
                None => "error".to_string(),
            };
            bail!("command exited with {error}: {rendered}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn resource(command: &str, creates: Option<&str>) -> Resource {
        Resource {
            source: None,
            name: command.to_owned(),
            spec: Spec::Command {
                command: command.to_owned(),
                cwd: None,
                user: None,
                environment: IndexMap::new(),
                creates: creates.map(str::to_owned),
                timeout_secs: None,
            },
            action: None,
            guard: None,
            require: vec![],
            notify: vec![],
            subscribe: vec![],
        }
    }

    #[test]
    fn without_creates_every_run_is_absent() {
        let provider = CommandProvider;
        let resource = resource("true", None);
        assert_eq!(Verdict::Absent, provider.inspect(&resource).unwrap());
        assert_eq!(Verdict::Absent, provider.inspect(&resource).unwrap());
    }

    #[test]
    fn creates_gates_the_rerun() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("schema-v1");
        let marker_str = marker.to_string_lossy().into_owned();

        let provider = CommandProvider;
        let resource = resource(&format!("touch {marker_str}"), Some(&marker_str));

        assert_eq!(Verdict::Absent, provider.inspect(&resource).unwrap());
        provider.apply(&resource).unwrap();
        assert!(marker.exists());
        assert_eq!(Verdict::Matches, provider.inspect(&resource).unwrap());
    }

    #[test]
    fn failures_name_the_command() {
        let provider = CommandProvider;
        let error = provider.apply(&resource("false", None)).unwrap_err();
        assert!(error.to_string().contains("false"), "{error}");
    }

    #[test]
    fn cwd_is_honored() {
        let dir = tempdir().unwrap();
        let mut resource = resource("touch marker", None);
        if let Spec::Command { cwd, .. } = &mut resource.spec {
            *cwd = Some(dir.path().to_string_lossy().into_owned());
        }

        CommandProvider.apply(&resource).unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
