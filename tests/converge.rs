//! End-to-end convergence over a real directory tree: first run converges everything and fires
//! the delayed restart once; a second run with no external changes is a pure no-op.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use steward::core::resource::{Kind, Resource};
use steward::core::Catalog;
use steward::provider::{DirectoryProvider, FileProvider, Provider, Registry, Verdict};
use steward::run::{run, RunOptions, Status};
use tempfile::tempdir;

/// An in-memory stand-in for the process supervisor, so the scenario runs unprivileged.
/// Semantics mirror the real service provider: applying an absent program enables it; applying
/// an enabled program restarts it.
#[derive(Debug, Default)]
struct SupervisorState {
    enabled: bool,
    restarts: u32,
}

struct FakeSupervisor {
    state: Rc<RefCell<SupervisorState>>,
}

impl Provider for FakeSupervisor {
    fn kind(&self) -> Kind {
        Kind::Service
    }

    fn inspect(&self, _resource: &Resource) -> anyhow::Result<Verdict> {
        match self.state.borrow().enabled {
            true => Ok(Verdict::Matches),
            false => Ok(Verdict::Absent),
        }
    }

    fn apply(&self, _resource: &Resource) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        match state.enabled {
            true => state.restarts += 1,
            false => state.enabled = true,
        }
        Ok(())
    }
}

fn catalog(basedir: &str) -> Catalog {
    let yaml = format!(
        "\
name: app deployment
vars:
  basedir: {basedir}
resources:
- name: $basedir
  spec:
    directory:
      path: $basedir
- name: $basedir/config.yml
  spec:
    file:
      path: $basedir/config.yml
      content: |
        listen: 127.0.0.1:9000
  require:
  - directory $basedir
  notify:
  - target: service app
- name: app
  spec:
    service:
      command: $basedir/bin/app
"
    );
    serde_yaml::from_str(&yaml).unwrap()
}

fn statuses(outcomes: &[steward::run::Outcome]) -> Vec<Status> {
    outcomes.iter().map(|outcome| outcome.status).collect()
}

#[test]
fn converges_then_holds_steady() {
    let base = tempdir().unwrap();
    let basedir = base.path().join("opt").join("app");
    let basedir_str = basedir.to_string_lossy().into_owned();

    let supervisor = Rc::new(RefCell::new(SupervisorState::default()));
    let mut registry = Registry::new();
    registry.register(Box::new(DirectoryProvider));
    registry.register(Box::new(FileProvider));
    registry.register(Box::new(FakeSupervisor {
        state: Rc::clone(&supervisor),
    }));

    let catalog = catalog(&basedir_str);
    let options = RunOptions::default();

    // First run: everything is absent, everything converges, and the config file's delayed
    // notification restarts the freshly enabled service exactly once.
    let first = run(&catalog, &registry, &options).unwrap();
    assert!(first.success());
    assert_eq!(
        vec![Status::Converged, Status::Converged, Status::Converged],
        statuses(&first.outcomes),
    );
    assert_eq!(1, first.reactions.len());
    assert_eq!("service app", first.reactions[0].target);
    assert!(basedir.is_dir());
    assert_eq!(
        "listen: 127.0.0.1:9000\n",
        fs::read_to_string(basedir.join("config.yml")).unwrap(),
    );
    assert!(supervisor.borrow().enabled);
    assert_eq!(1, supervisor.borrow().restarts);

    // Second run with no external changes: all up to date, zero notifications.
    let second = run(&catalog, &registry, &options).unwrap();
    assert!(second.success());
    assert_eq!(
        vec![Status::UpToDate, Status::UpToDate, Status::UpToDate],
        statuses(&second.outcomes),
    );
    assert!(second.reactions.is_empty());
    assert_eq!(1, supervisor.borrow().restarts);

    // Drift: someone edits the config behind our back. Only the file reconverges, and the
    // change propagates to the service again.
    fs::write(basedir.join("config.yml"), "listen: 0.0.0.0:9000\n").unwrap();
    let third = run(&catalog, &registry, &options).unwrap();
    assert!(third.success());
    assert_eq!(
        vec![Status::UpToDate, Status::Converged, Status::UpToDate],
        statuses(&third.outcomes),
    );
    assert_eq!(1, third.reactions.len());
    assert_eq!(2, supervisor.borrow().restarts);
    assert_eq!(
        "listen: 127.0.0.1:9000\n",
        fs::read_to_string(basedir.join("config.yml")).unwrap(),
    );
}
