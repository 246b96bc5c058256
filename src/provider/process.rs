//! Utilities for running host processes and replacing files from providers.
//!
//! Everything here funnels through [std::process::Command]; providers never build their own
//! error strings for failed commands. Waits are bounded: a provider call must not suspend
//! indefinitely, so anything that might hang goes through [wait_with_timeout].

use anyhow::{bail, Context};
use shlex::Quoter;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// How long a provider-spawned process may run before it is killed and reported as a failure.
/// The `command` resource kind can override this per declaration.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Joins a command and its arguments into a user-friendly representation for error output.
///
/// There are at least three likely ways this information might be used: in separate fields as
/// part of calling code, in a YAML file, and in the user's shell. These all present the
/// information a bit differently, so there is no canonical representation to apply. We just
/// want to make a best effort to indicate to the user what went wrong.
pub fn render<C: AsRef<OsStr>, A: AsRef<OsStr>>(cmd: C, args: &[A]) -> String {
    // Build a Vec of the command and its arguments as Strings.
    let mut components = Vec::with_capacity(args.len() + 1);
    components.push(cmd.as_ref().to_string_lossy().to_string());
    components.extend(
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().to_string()),
    );

    // Try to use shlex to properly quote the string. If that fails, naively join with spaces.
    match Quoter::new().join(components.iter().map(|s| &s[..])) {
        Ok(s) => s,
        Err(_) => components.join(" "),
    }
}

/// Runs a command as a new process and waits (bounded by [DEFAULT_TIMEOUT]) for it to complete.
///
/// Standard input, output, and error are inherited from the parent process.
///
/// # Errors
///
/// Returns an error if the command cannot be run for any reason, exits with an error, or is
/// still running when the timeout expires.
pub fn run<C: AsRef<OsStr>, A: AsRef<OsStr>>(cmd: C, args: &[A]) -> anyhow::Result<()> {
    let rendered = render(&cmd, args);

    let child = Command::new(&cmd)
        .args(args)
        .spawn()
        .with_context(|| format!("failed to start command: {rendered}"))?;

    let status = wait_with_timeout(child, DEFAULT_TIMEOUT, &rendered)?;
    if !status.success() {
        let error = match status.code() {
            Some(i) => format!("exit code {i}"),
            None => "error".to_string(),
        };
        bail!("command exited with {error}: {rendered}");
    }
    Ok(())
}

/// Runs a command with stdout captured and stderr discarded, waiting bounded by
/// [DEFAULT_TIMEOUT].
///
/// Unlike [run], a non-zero exit is *not* an error here: inspection code routinely asks
/// questions whose answer is an exit status (`dpkg-query` on a missing package, `supervisorctl
/// status` on a stopped program). The caller inspects [Output::status] itself.
pub fn output<C: AsRef<OsStr>, A: AsRef<OsStr>>(cmd: C, args: &[A]) -> anyhow::Result<Output> {
    let rendered = render(&cmd, args);

    let child = Command::new(&cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start command: {rendered}"))?;

    wait_for_output(child, DEFAULT_TIMEOUT, &rendered)
}

/// Runs a command line (split into an argv vector, not through a shell) and reports whether it
/// exited 0. Used for `command_succeeds` guards.
pub fn succeeds(command: &str) -> anyhow::Result<bool> {
    let argv = shlex::split(command)
        .with_context(|| format!("failed to parse command line: {command}"))?;
    let (cmd, args) = match argv.split_first() {
        Some(split) => split,
        None => bail!("empty command line"),
    };

    let child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start command: {command}"))?;

    let status = wait_with_timeout(child, DEFAULT_TIMEOUT, command)?;
    Ok(status.success())
}

/// Waits for `child` to exit, polling so the wait can be bounded. On timeout the child is
/// killed and an error naming `what` is returned.
pub fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    what: &str,
) -> anyhow::Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            // Kill and reap; a zombie would outlive the run.
            let _ = child.kill();
            let _ = child.wait();
            bail!("command timed out after {}s: {what}", timeout.as_secs());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// [wait_with_timeout] for a child whose stdout is piped; returns the full [Output].
fn wait_for_output(mut child: Child, timeout: Duration, what: &str) -> anyhow::Result<Output> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(_) => {
                return child
                    .wait_with_output()
                    .with_context(|| format!("failed to collect output: {what}"));
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("command timed out after {}s: {what}", timeout.as_secs());
            }
            None => thread::sleep(Duration::from_millis(50)),
        }
    }
}

/// Atomically replaces the file at `path` with `contents`.
///
/// The contents are written to a temporary file in the destination's directory and renamed over
/// the destination, so a reader never observes a half-written file and a failed apply leaves
/// either the old file or the new one, never a torn state.
pub fn replace_file(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => bail!("cannot replace {}: no parent directory", path.display()),
    };

    let mut file = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Reads a file's contents, mapping "not found" to [None] so inspection code can distinguish
/// absence from unreadability.
pub fn read_if_present(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => {
            Err(error).with_context(|| format!("failed to read {}", path.display()))
        }
    }
}
