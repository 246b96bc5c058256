//! Types for representing catalog files: the desired-state document.

use crate::core::resource::Resource;
use crate::error::Error;
use crate::secrets::Lookup;
use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A catalog file: the ordered list of resource declarations steward converges a host to,
/// plus the variables interpolated into them.
///
/// This type is typically parsed from a catalog file, but it can be constructed programmatically
/// as well.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Catalog {
    /// The file from which this value was parsed (if any).
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// The catalog's name. Used for informational, logging, and debugging purposes.
    pub name: String,

    /// Interpolation variables, substituted into every string attribute of every resource when
    /// the catalog is compiled.
    ///
    /// Order is preserved from the source file. Variables are substituted in order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, String>,

    /// Secret references: variable name to secret-store key.
    ///
    /// Resolved by the caller through a [Lookup] collaborator before the catalog is compiled;
    /// resolved values land in [Catalog::vars] and take precedence over plain variables of the
    /// same name. The convergence engine itself never touches the secret store.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub secrets: IndexMap<String, String>,

    /// The declared resources.
    ///
    /// Order is preserved from the source file. Declaration order is the tie-break for the
    /// execution order, so an unchanged catalog always executes the same way.
    pub resources: Vec<Resource>,
}

/// Loads one [Catalog] from each file and merges them, in order, into a single catalog.
///
/// Resources concatenate in file order. Variables and secret references merge with
/// later files taking precedence. The merged catalog keeps the first file's name.
pub fn load_catalogs(files: &[impl AsRef<Path>]) -> anyhow::Result<Catalog> {
    let mut combined: Option<Catalog> = None;
    for file in files {
        let mut catalog = Catalog::load(file.as_ref())?;
        match &mut combined {
            None => combined = Some(catalog),
            Some(merged) => {
                merged.vars.extend(catalog.vars);
                merged.secrets.extend(catalog.secrets);
                merged.resources.append(&mut catalog.resources);
            }
        }
    }
    combined.context("no catalog files were given")
}

impl Catalog {
    /// Creates an empty [Catalog], i.e. one with no resources.
    pub fn new(name: impl Into<String>) -> Self {
        Catalog {
            name: name.into(),
            ..Catalog::default()
        }
    }

    /// Parses a catalog from a YAML file, recording the source path on the catalog and on each
    /// resource for informational and logging purposes.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file: {}", path.display()))?;
        let mut catalog: Catalog = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse catalog file: {}", path.display()))?;
        catalog.source = Some(path.to_owned());
        for resource in &mut catalog.resources {
            resource.source = Some(path.to_owned());
        }
        Ok(catalog)
    }

    /// Resolves the catalog's secret references through `store`, merging the resolved values
    /// into [Catalog::vars].
    ///
    /// Resolved secrets override plain variables of the same name. Fails if any referenced key
    /// is missing from the store; a catalog that declares a secret requires it.
    pub fn resolve_secrets(&mut self, store: &impl Lookup) -> anyhow::Result<()> {
        for (var, key) in &self.secrets {
            let value = store
                .get(key)
                .with_context(|| format!("failed to resolve secret `{var}`"))?;
            self.vars.insert(var.clone(), value);
        }
        Ok(())
    }

    /// Interpolates [Catalog::vars] into every resource, yielding the declarations the engine
    /// executes. See [Resource::compile] for the substitution rules.
    pub fn compile(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|resource| resource.compile(&self.vars))
            .collect()
    }
}

/// Checks the declaration-level invariants the engine assumes: unique identities and converge
/// verbs legal for their kind.
///
/// Reference resolution is deliberately left to graph construction, which builds the identity
/// index anyway.
pub fn validate(resources: &[Resource]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for resource in resources {
        let id = resource.id();
        if !seen.insert(id.clone()) {
            return Err(Error::DuplicateResource(id));
        }
        let action = resource.action();
        if !id.kind.supports(action) {
            return Err(Error::InvalidAction {
                kind: id.kind,
                action,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::catalog;
    use super::*;
    use crate::core::resource::{Action, Kind, Spec};
    use crate::secrets::SecretStore;

    mod load_catalogs {
        use super::*;

        // load_catalogs surfaces any errors it encounters, and all the complex work it does is
        // through code that's already under test elsewhere, so we focus on the merge rules.

        #[test]
        fn works() {
            let base = Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("resources/test/catalogs/tracker.yml");
            let extra = Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("resources/test/catalogs/backups.yml");
            let merged = load_catalogs(&[base, extra]).unwrap();

            assert_eq!("tracker", merged.name);

            // Resources concatenate in file order.
            let names: Vec<_> = merged
                .resources
                .iter()
                .map(|resource| resource.name.clone())
                .collect();
            assert_eq!(
                vec![
                    "/opt/tracker".to_owned(),
                    "/opt/tracker/config.yml".to_owned(),
                    "tracker-web".to_owned(),
                    "tracker-backup".to_owned(),
                ],
                names,
            );

            // Later files win on merge.
            assert_eq!("/var/backups/tracker", merged.vars["backup_dir"]);

            // Each resource remembers which file declared it.
            assert!(merged.resources[0]
                .source
                .as_ref()
                .unwrap()
                .ends_with("tracker.yml"));
            assert!(merged.resources[3]
                .source
                .as_ref()
                .unwrap()
                .ends_with("backups.yml"));
        }

        #[test]
        fn fails_with_no_files() {
            assert!(load_catalogs(&Vec::<PathBuf>::new()).is_err());
        }
    }

    mod resolve_secrets {
        use super::*;

        #[test]
        fn merges_resolved_values_into_vars() {
            let (mut catalog, _) = catalog();
            catalog
                .secrets
                .insert("db_password".to_owned(), "postgres:password:tracker".to_owned());

            let store = SecretStore::from_values(IndexMap::from([(
                "postgres:password:tracker".to_owned(),
                "hunter2".to_owned(),
            )]));

            catalog.resolve_secrets(&store).unwrap();
            assert_eq!("hunter2", catalog.vars["db_password"]);
        }

        #[test]
        fn resolved_secrets_override_plain_vars() {
            let (mut catalog, _) = catalog();
            catalog
                .vars
                .insert("db_password".to_owned(), "plaintext".to_owned());
            catalog
                .secrets
                .insert("db_password".to_owned(), "postgres:password:tracker".to_owned());

            let store = SecretStore::from_values(IndexMap::from([(
                "postgres:password:tracker".to_owned(),
                "hunter2".to_owned(),
            )]));

            catalog.resolve_secrets(&store).unwrap();
            assert_eq!("hunter2", catalog.vars["db_password"]);
        }

        #[test]
        fn fails_on_missing_keys() {
            let (mut catalog, _) = catalog();
            catalog
                .secrets
                .insert("db_password".to_owned(), "postgres:password:tracker".to_owned());

            let store = SecretStore::from_values(IndexMap::new());
            assert!(catalog.resolve_secrets(&store).is_err());
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn accepts_a_well_formed_catalog() {
            let (catalog, _) = catalog();
            assert_eq!(Ok(()), validate(&catalog.resources));
        }

        #[test]
        fn rejects_duplicate_identities() {
            let (mut catalog, resource) = catalog();
            catalog.resources.push(resource.clone());

            assert_eq!(
                Err(Error::DuplicateResource(resource.id())),
                validate(&catalog.resources),
            );
        }

        #[test]
        fn same_name_under_different_kinds_is_fine() {
            let (mut catalog, resource) = catalog();
            catalog.resources.push(Resource {
                source: None,
                name: resource.name.clone(),
                spec: Spec::Directory {
                    path: resource.name.clone(),
                    owner: None,
                    group: None,
                    mode: None,
                },
                action: None,
                guard: None,
                require: vec![],
                notify: vec![],
                subscribe: vec![],
            });

            assert_eq!(Ok(()), validate(&catalog.resources));
        }

        #[test]
        fn rejects_actions_the_kind_cannot_perform() {
            let (mut catalog, _) = catalog();
            catalog.resources[0].action = Some(Action::Start);

            assert_eq!(
                Err(Error::InvalidAction {
                    kind: Kind::File,
                    action: Action::Start,
                }),
                validate(&catalog.resources),
            );
        }
    }

    mod compile {
        use super::*;

        #[test]
        fn interpolates_vars_into_every_resource() {
            let (mut catalog, _) = catalog();
            catalog
                .vars
                .insert("basedir".to_owned(), "/opt/tracker".to_owned());
            if let Spec::File { path, .. } = &mut catalog.resources[0].spec {
                *path = "$basedir/config.yml".to_owned();
            }

            let compiled = catalog.compile();
            match &compiled[0].spec {
                Spec::File { path, .. } => assert_eq!("/opt/tracker/config.yml", path),
                spec => panic!("bug in test fixture. Unexpected spec: {spec:?}"),
            }
        }
    }
}
