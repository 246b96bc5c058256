//! Types for representing individual resource declarations.

#[cfg(doc)]
use crate::core::catalog::Catalog;
use indexmap::IndexMap;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The capability kinds steward knows how to converge.
///
/// A [Kind] is half of a resource's identity (see [ResourceId]) and the key under which providers
/// register themselves. It is always derived from the declaration's [Spec] variant; it is never
/// written separately in a catalog file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Directory,
    File,
    Package,
    Service,
    Cron,
    Command,
}

impl Kind {
    /// The lowercase form used in catalog references and log output.
    pub fn as_str(self) -> &'static str {
        use Kind::*;
        match self {
            Directory => "directory",
            File => "file",
            Package => "package",
            Service => "service",
            Cron => "cron",
            Command => "command",
        }
    }

    /// The converge verb assumed when a declaration omits `action`.
    pub fn default_action(self) -> Action {
        use Kind::*;
        match self {
            Directory | File | Package | Cron => Action::Create,
            Service => Action::Enable,
            Command => Action::Run,
        }
    }

    /// Returns whether `action` is a verb this kind can perform.
    pub fn supports(self, action: Action) -> bool {
        use Kind::*;
        match self {
            Directory | File | Package | Cron => {
                matches!(action, Action::Create | Action::Delete)
            }
            Service => matches!(
                action,
                Action::Enable | Action::Start | Action::Stop | Action::Delete
            ),
            Command => matches!(action, Action::Run),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource's identity: its [Kind] plus its declared name, unique within a catalog.
///
/// Rendered and parsed as `<kind> <name>`, e.g. `file /opt/tracker/config.yml`. This is the form
/// `require`, `notify`, and `subscribe` entries use to point at other resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: Kind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        ResourceId {
            kind,
            name: name.into(),
        }
    }

    /// Parses a `<kind> <name>` reference. Returns [None] if the kind is unknown or the name is
    /// missing; the caller decides how to report that.
    pub fn parse(reference: &str) -> Option<Self> {
        let (kind, name) = reference.trim().split_once(' ')?;
        use Kind::*;
        let kind = match kind {
            "directory" => Directory,
            "file" => File,
            "package" => Package,
            "service" => Service,
            "cron" => Cron,
            "command" => Command,
            _ => return None,
        };
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(ResourceId::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// The converge verb a declaration requests.
///
/// Each [Kind] accepts a subset of these; see [Kind::supports]. Catalog validation rejects a verb
/// the resource's kind cannot perform, so providers never see one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
    Run,
    Enable,
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Action::*;
        f.write_str(match self {
            Create => "create",
            Delete => "delete",
            Run => "run",
            Enable => "enable",
            Start => "start",
            Stop => "stop",
        })
    }
}

/// When a notification reaction runs relative to the main graph walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    /// The reaction runs inline, right after the notifying resource converges, before the
    /// executor proceeds to the next resource. Not deduplicated; runs once per trigger.
    Immediate,

    /// The reaction is queued, deduplicated by target, and runs once after the main walk
    /// completes (and only if the walk completed without aborting).
    #[default]
    Delayed,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Timing::Immediate => "immediate",
            Timing::Delayed => "delayed",
        })
    }
}

fn is_delayed(timing: &Timing) -> bool {
    *timing == Timing::Delayed
}

/// A notification this resource sends when (and only when) it actually changes state.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Notify {
    /// A `<kind> <name>` reference to the reacting resource.
    pub target: String,

    #[serde(default, skip_serializing_if = "is_delayed")]
    pub timing: Timing,
}

/// The inverse declaration: this resource reacts when the named source changes state.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Subscribe {
    /// A `<kind> <name>` reference to the resource being watched.
    pub source: String,

    #[serde(default, skip_serializing_if = "is_delayed")]
    pub timing: Timing,
}

/// A precondition gating whether a resource is processed at all.
///
/// Guards are evaluated when the executor reaches the resource, not at parse time: a
/// `command_succeeds` guard needs the host state as of the resource's turn, which earlier
/// resources may have changed. A false guard skips the resource entirely; neither `inspect` nor
/// `apply` is called. A guard that cannot be evaluated marks the resource failed rather than
/// silently skipping it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// True if the path exists.
    FileExists(String),

    /// True if the path does not exist.
    FileMissing(String),

    /// True if the command exits 0. The command is split into an argv vector; it is not run
    /// through a shell.
    CommandSucceeds(String),
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn default_numprocs() -> u32 {
    1
}

fn is_one(value: &u32) -> bool {
    *value == 1
}

fn default_star() -> String {
    "*".to_owned()
}

fn is_star(value: &String) -> bool {
    value == "*"
}

fn default_cron_user() -> String {
    "root".to_owned()
}

fn is_root(value: &String) -> bool {
    value == "root"
}

/// The desired-state attributes of one resource, one schema per [Kind].
///
/// Attributes are validated during deserialization: an unknown kind or a malformed attribute
/// fails catalog load, long before anything touches the host. The engine itself never looks
/// inside a [Spec]; only the matching provider does.
///
/// # (De)serialization
///
/// [Resource] applies `#[serde(with = "serde_yaml::with::singleton_map")]` to its spec field, so
/// catalogs write the kind as a plain mapping key (`directory:`, `file:`, ...) rather than YAML
/// tag notation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Spec {
    Directory {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        /// Octal permission string, e.g. `"0755"`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },

    File {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },

    Package {
        /// Package-manager name. Defaults to the resource name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        package: Option<String>,
        /// Exact version to hold; any installed version satisfies the resource when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// A process-supervisor program stanza.
    Service {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default = "default_numprocs", skip_serializing_if = "is_one")]
        numprocs: u32,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        autostart: bool,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        autorestart: bool,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        environment: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout_logfile: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_logfile: Option<String>,
    },

    /// A scheduled job entry, written to the system cron drop-in directory.
    Cron {
        command: String,
        #[serde(default = "default_cron_user", skip_serializing_if = "is_root")]
        user: String,
        #[serde(default = "default_star", skip_serializing_if = "is_star")]
        minute: String,
        #[serde(default = "default_star", skip_serializing_if = "is_star")]
        hour: String,
        #[serde(default = "default_star", skip_serializing_if = "is_star")]
        day: String,
        #[serde(default = "default_star", skip_serializing_if = "is_star")]
        month: String,
        #[serde(default = "default_star", skip_serializing_if = "is_star")]
        weekday: String,
    },

    /// A one-shot command. Idempotent only when `creates` is given: the command is skipped
    /// whenever that path already exists.
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        environment: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creates: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

impl Spec {
    pub fn kind(&self) -> Kind {
        use Spec::*;
        match self {
            Directory { .. } => Kind::Directory,
            File { .. } => Kind::File,
            Package { .. } => Kind::Package,
            Service { .. } => Kind::Service,
            Cron { .. } => Kind::Cron,
            Command { .. } => Kind::Command,
        }
    }
}

/// A single declared unit of desired state; typically parsed as part of a [Catalog].
///
/// Constructed once during declaration, compiled (variable interpolation) once before the graph
/// is built, and immutable from then on. Per-resource outcomes live in the run report, not here.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Resource {
    /// The file from which this value was parsed (if any).
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// The resource's name: the second half of its identity, unique per kind within a catalog.
    pub name: String,

    /// Desired-state attributes; also determines the resource's [Kind].
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub spec: Spec,

    /// The converge verb. Omitted in most declarations; see [Kind::default_action].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    /// Precondition gating the whole resource.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub guard: Option<Guard>,

    /// Explicit ordering dependencies: `<kind> <name>` references that must converge first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,

    /// Notifications sent when this resource actually changes state.
    ///
    /// Order is preserved from the source file; immediate reactions fire in this order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<Notify>,

    /// Resources this one reacts to; the inverse view of [Resource::notify].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribe: Vec<Subscribe>,
}

impl Resource {
    /// The resource's `(kind, name)` identity.
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.spec.kind(), self.name.clone())
    }

    /// The effective converge verb: the declared one, or the kind's default.
    pub fn action(&self) -> Action {
        self.action.unwrap_or_else(|| self.spec.kind().default_action())
    }

    /// Returns a copy of this resource with variables interpolated into every string attribute.
    ///
    /// # Variable substitution
    ///
    /// There are two forms of variable substitution:
    ///
    /// 1. Simple substitution (`$var`): any occurrence of `$var` is replaced with the variable
    ///    named `var`, if one exists. Matching works on word boundaries, so `$foobar` does not
    ///    match the variable `foo`; use braced substitution in such situations: `${foo}bar`.
    ///
    /// 2. Braced substitution (`${var}`): any occurrence of `${var}` is substituted with the
    ///    variable named `var`, if one exists. This cannot be used recursively; it is a simple
    ///    text substitution.
    ///
    /// References that do not match any variable pass through unchanged, so commands may still
    /// use host-side shell variables freely.
    ///
    /// # Substitution order
    ///
    /// Variables are substituted in the order in which they are defined. By relying on this
    /// ordering, it is possible to use cascading variable substitutions to a limited degree,
    /// though this generally is not recommended.
    pub fn compile(&self, vars: &IndexMap<String, String>) -> Resource {
        let mut resource = self.clone();

        // In order to prevent accidentally recursively substituting variables in some strange
        // corner and edge cases, we use a single regular expression per variable rather than two
        // naive string substitution passes.
        for (var, value) in vars {
            // Form a regular expression that matches $<var> (as a whole word) and ${<var>} where
            // <var> is the name of the variable.
            let pattern = format!(r"\${var}\b|\$\{{{var}}}");
            let regex = Regex::new(&pattern).unwrap();

            let replace = |s: &mut String| {
                let _ = std::mem::replace(s, regex.replace_all(s, NoExpand(value)).into_owned());
            };

            resource.for_each_string(&replace);
        }
        resource
    }

    /// Applies `replace` to every user-supplied string in the declaration: the name, all spec
    /// attributes, guard operands, and all references.
    fn for_each_string(&mut self, replace: &impl Fn(&mut String)) {
        fn opt(value: &mut Option<String>, replace: &impl Fn(&mut String)) {
            if let Some(value) = value {
                replace(value);
            }
        }

        replace(&mut self.name);

        use Spec::*;
        match &mut self.spec {
            Directory {
                path,
                owner,
                group,
                mode,
            } => {
                replace(path);
                opt(owner, replace);
                opt(group, replace);
                opt(mode, replace);
            }
            File {
                path,
                content,
                owner,
                group,
                mode,
            } => {
                replace(path);
                replace(content);
                opt(owner, replace);
                opt(group, replace);
                opt(mode, replace);
            }
            Package { package, version } => {
                opt(package, replace);
                opt(version, replace);
            }
            Service {
                command,
                directory,
                user,
                environment,
                stdout_logfile,
                stderr_logfile,
                ..
            } => {
                replace(command);
                opt(directory, replace);
                opt(user, replace);
                environment.values_mut().for_each(replace);
                opt(stdout_logfile, replace);
                opt(stderr_logfile, replace);
            }
            Cron {
                command,
                user,
                minute,
                hour,
                day,
                month,
                weekday,
            } => {
                replace(command);
                replace(user);
                replace(minute);
                replace(hour);
                replace(day);
                replace(month);
                replace(weekday);
            }
            Command {
                command,
                cwd,
                user,
                environment,
                creates,
                ..
            } => {
                replace(command);
                opt(cwd, replace);
                opt(user, replace);
                environment.values_mut().for_each(replace);
                opt(creates, replace);
            }
        }

        match &mut self.guard {
            Some(Guard::FileExists(path)) | Some(Guard::FileMissing(path)) => replace(path),
            Some(Guard::CommandSucceeds(command)) => replace(command),
            None => {}
        }

        self.require.iter_mut().for_each(replace);
        for notify in &mut self.notify {
            replace(&mut notify.target);
        }
        for subscribe in &mut self.subscribe {
            replace(&mut subscribe.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::catalog;
    use super::*;

    mod resource_id {
        use super::*;

        #[test]
        fn parses_kind_and_name() {
            assert_eq!(
                Some(ResourceId::new(Kind::File, "/opt/tracker/config.yml")),
                ResourceId::parse("file /opt/tracker/config.yml"),
            );
        }

        #[test]
        fn preserves_spaces_in_names() {
            assert_eq!(
                Some(ResourceId::new(Kind::Command, "run database migration")),
                ResourceId::parse("command run database migration"),
            );
        }

        #[test]
        fn rejects_unknown_kinds() {
            assert_eq!(None, ResourceId::parse("filesystem /opt"));
        }

        #[test]
        fn rejects_missing_names() {
            assert_eq!(None, ResourceId::parse("file"));
            assert_eq!(None, ResourceId::parse("file "));
        }

        #[test]
        fn display_round_trips() {
            let id = ResourceId::new(Kind::Service, "tracker-web");
            assert_eq!(Some(id.clone()), ResourceId::parse(&id.to_string()));
        }
    }

    mod actions {
        use super::*;

        #[test]
        fn defaults_per_kind() {
            assert_eq!(Action::Create, Kind::Directory.default_action());
            assert_eq!(Action::Create, Kind::File.default_action());
            assert_eq!(Action::Create, Kind::Package.default_action());
            assert_eq!(Action::Create, Kind::Cron.default_action());
            assert_eq!(Action::Enable, Kind::Service.default_action());
            assert_eq!(Action::Run, Kind::Command.default_action());
        }

        #[test]
        fn every_default_is_supported() {
            use Kind::*;
            for kind in [Directory, File, Package, Service, Cron, Command] {
                assert!(kind.supports(kind.default_action()), "{kind}");
            }
        }

        #[test]
        fn commands_only_run() {
            assert!(!Kind::Command.supports(Action::Create));
            assert!(!Kind::Command.supports(Action::Delete));
        }

        #[test]
        fn declared_action_takes_precedence() {
            let (_, mut resource) = catalog();
            resource.action = Some(Action::Delete);
            assert_eq!(Action::Delete, resource.action());
        }
    }

    mod compile {
        use super::*;

        // Compiles a file resource whose content is `input`, with the given variable
        // assignments, and returns the interpolated content.
        fn compile(vars: &[(&'static str, &'static str)], input: impl Into<String>) -> String {
            let vars = IndexMap::from_iter(
                vars.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            );

            let (_, mut resource) = catalog();
            if let Spec::File { content, .. } = &mut resource.spec {
                *content = input.into();
            }

            match resource.compile(&vars).spec {
                Spec::File { content, .. } => content,
                spec => panic!("bug in test fixture. Unexpected spec: {spec:?}"),
            }
        }

        #[test]
        fn merges_vars() {
            assert_eq!("bar", compile(&[("foo", "bar")], "$foo"));
        }

        #[test]
        fn non_matching_vars_are_noop() {
            assert_eq!("noop", compile(&[("foo", "foo")], "noop"));
        }

        #[test]
        fn non_matching_substitutions_are_noop() {
            // Be sure to keep at least one variable so that the for loop runs.
            assert_eq!("$bar", compile(&[("foo", "foo")], "$bar"));
        }

        #[test]
        fn simple_substitution_does_not_match_var_substrings() {
            assert_eq!("$foobar", compile(&[("foo", "bar")], "$foobar"));
        }

        #[test]
        fn braced_substitution_works() {
            assert_eq!("barbar", compile(&[("foo", "bar")], "${foo}bar"));
        }

        #[test]
        fn merges_in_order() {
            assert_eq!(
                "done",
                compile(&[("1", "$2"), ("2", "$3"), ("3", "done")], "$1"),
            );
        }

        #[test]
        fn reaches_guards_and_references() {
            let vars = IndexMap::from([("basedir".to_owned(), "/opt/tracker".to_owned())]);

            let (_, mut resource) = catalog();
            resource.guard = Some(Guard::FileExists("$basedir/.venv".to_owned()));
            resource.require = vec!["directory $basedir".to_owned()];
            resource.notify = vec![Notify {
                target: "service $basedir".to_owned(),
                timing: Timing::Delayed,
            }];

            let compiled = resource.compile(&vars);
            assert_eq!(
                Some(Guard::FileExists("/opt/tracker/.venv".to_owned())),
                compiled.guard,
            );
            assert_eq!(vec!["directory /opt/tracker".to_owned()], compiled.require);
            assert_eq!("service /opt/tracker", compiled.notify[0].target);
        }

        #[test]
        fn reaches_environment_values() {
            let vars = IndexMap::from([("basedir".to_owned(), "/opt/tracker".to_owned())]);

            let resource = Resource {
                source: None,
                name: "migrate".to_owned(),
                spec: Spec::Command {
                    command: "$basedir/bin/migrate".to_owned(),
                    cwd: Some("$basedir".to_owned()),
                    user: None,
                    environment: IndexMap::from([(
                        "TRACKER_CONF".to_owned(),
                        "$basedir".to_owned(),
                    )]),
                    creates: None,
                    timeout_secs: None,
                },
                action: None,
                guard: None,
                require: vec![],
                notify: vec![],
                subscribe: vec![],
            };

            match resource.compile(&vars).spec {
                Spec::Command {
                    command,
                    cwd,
                    environment,
                    ..
                } => {
                    assert_eq!("/opt/tracker/bin/migrate", command);
                    assert_eq!(Some("/opt/tracker".to_owned()), cwd);
                    assert_eq!("/opt/tracker", environment["TRACKER_CONF"]);
                }
                spec => panic!("bug in test fixture. Unexpected spec: {spec:?}"),
            }
        }
    }
}
