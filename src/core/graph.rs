//! The resource dependency graph and its deterministic execution order.

use crate::core::resource::{Resource, ResourceId, Timing};
use crate::error::Error;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// The dependency graph over a compiled resource list.
///
/// Nodes are declaration indices into the resource list the graph was built from. Edges come
/// from three sources, all pointing from the resource that must converge first to the one that
/// must converge after it:
///
/// * explicit `require` declarations,
/// * `notify` declarations (a notifier converges before its target), and
/// * `subscribe` declarations (the watched resource converges before the subscriber).
///
/// Notification edges additionally carry their [Timing] so the executor can dispatch reactions
/// without re-reading declarations.
#[derive(Clone, Debug)]
pub struct Graph {
    /// Node identities, in declaration order.
    ids: Vec<ResourceId>,

    /// Ordering edges: `edges[before]` lists every node that must run after `before`.
    edges: Vec<Vec<usize>>,

    /// Notification edges: `notifications[source]` lists `(target, timing)` pairs in the order
    /// reactions should be considered when `source` converges.
    notifications: Vec<Vec<(usize, Timing)>>,
}

impl Graph {
    /// Builds the graph for a compiled resource list, resolving every reference.
    ///
    /// Fails if any `require`/`notify`/`subscribe` entry is malformed or names a resource that
    /// is not in the list. Resolution happens here, before anything touches the host, so a
    /// catalog with dangling references never partially converges.
    pub fn build(resources: &[Resource]) -> Result<Self, Error> {
        let ids: Vec<ResourceId> = resources.iter().map(Resource::id).collect();
        let index: HashMap<&ResourceId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let resolve = |owner: usize, reference: &str| -> Result<usize, Error> {
            let id = ResourceId::parse(reference).ok_or_else(|| Error::MalformedReference {
                resource: ids[owner].clone(),
                reference: reference.to_owned(),
            })?;
            index
                .get(&id)
                .copied()
                .ok_or_else(|| Error::UnknownReference {
                    resource: ids[owner].clone(),
                    reference: reference.to_owned(),
                })
        };

        let mut edges = vec![Vec::new(); ids.len()];
        let mut notifications: Vec<Vec<(usize, Timing)>> = vec![Vec::new(); ids.len()];

        for (i, resource) in resources.iter().enumerate() {
            for reference in &resource.require {
                let before = resolve(i, reference)?;
                edges[before].push(i);
            }
            // Notification edges are ordering edges too: a notifier converges before its
            // target, whichever side declared the relationship.
            for notify in &resource.notify {
                let target = resolve(i, &notify.target)?;
                edges[i].push(target);
                notifications[i].push((target, notify.timing));
            }
            for subscribe in &resource.subscribe {
                let source = resolve(i, &subscribe.source)?;
                edges[source].push(i);
                notifications[source].push((i, subscribe.timing));
            }
        }

        Ok(Graph {
            ids,
            edges,
            notifications,
        })
    }

    /// The identity of node `index`.
    pub fn id(&self, index: usize) -> &ResourceId {
        &self.ids[index]
    }

    /// The reactions to consider when node `source` converges: `notify` entries in declaration
    /// order, then subscriber entries in subscriber declaration order.
    pub fn notifications(&self, source: usize) -> &[(usize, Timing)] {
        &self.notifications[source]
    }

    /// Computes the execution order: a topological sort with declaration order as the
    /// tie-break, so two runs over an unchanged catalog always execute identically.
    ///
    /// Fails with [Error::Cycle] if no valid order exists, naming every resource that could not
    /// be placed.
    pub fn order(&self) -> Result<Vec<usize>, Error> {
        let mut indegree = vec![0usize; self.ids.len()];
        for targets in &self.edges {
            for &target in targets {
                indegree[target] += 1;
            }
        }

        // Kahn's algorithm over a min-heap of declaration indices: among all currently
        // unblocked resources, the earliest-declared one runs next.
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.ids.len());
        while let Some(Reverse(next)) = ready.pop() {
            order.push(next);
            for &target in &self.edges[next] {
                indegree[target] -= 1;
                if indegree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() != self.ids.len() {
            let unplaced = indegree
                .iter()
                .enumerate()
                .filter(|(_, &degree)| degree > 0)
                .map(|(i, _)| self.ids[i].to_string())
                .collect();
            return Err(Error::Cycle(unplaced));
        }
        Ok(order)
    }

    /// Every node reachable from `start` along ordering edges, excluding `start` itself.
    ///
    /// The continue-on-error mode uses this to mark a failed resource's transitive dependents
    /// as not run while independent branches keep converging.
    pub fn dependents(&self, start: usize) -> Vec<usize> {
        let mut visited = vec![false; self.ids.len()];
        let mut stack: Vec<usize> = self.edges[start].clone();
        let mut dependents = Vec::new();
        while let Some(next) = stack.pop() {
            if visited[next] || next == start {
                continue;
            }
            visited[next] = true;
            dependents.push(next);
            stack.extend(&self.edges[next]);
        }
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::{Kind, Notify, Spec, Subscribe};

    // Builds a command resource with the given name and explicit dependencies.
    fn resource(name: &str, require: &[&str]) -> Resource {
        Resource {
            source: None,
            name: name.to_owned(),
            spec: Spec::Command {
                command: "true".to_owned(),
                cwd: None,
                user: None,
                environment: Default::default(),
                creates: None,
                timeout_secs: None,
            },
            action: None,
            guard: None,
            require: require.iter().map(|r| (*r).to_owned()).collect(),
            notify: vec![],
            subscribe: vec![],
        }
    }

    mod build {
        use super::*;

        #[test]
        fn rejects_unknown_references() {
            let resources = vec![resource("a", &["command ghost"])];
            assert_eq!(
                Err(Error::UnknownReference {
                    resource: ResourceId::new(Kind::Command, "a"),
                    reference: "command ghost".to_owned(),
                }),
                Graph::build(&resources).map(|_| ()),
            );
        }

        #[test]
        fn rejects_malformed_references() {
            let resources = vec![resource("a", &["nonsense"])];
            assert_eq!(
                Err(Error::MalformedReference {
                    resource: ResourceId::new(Kind::Command, "a"),
                    reference: "nonsense".to_owned(),
                }),
                Graph::build(&resources).map(|_| ()),
            );
        }

        #[test]
        fn subscribe_points_the_same_way_as_notify() {
            // b subscribes to a: the notification edge is a -> b either way.
            let mut a = resource("a", &[]);
            a.notify.push(Notify {
                target: "command b".to_owned(),
                timing: Timing::Delayed,
            });
            let mut c = resource("c", &[]);
            c.subscribe.push(Subscribe {
                source: "command a".to_owned(),
                timing: Timing::Immediate,
            });
            let resources = vec![a, resource("b", &[]), c];

            let graph = Graph::build(&resources).unwrap();
            assert_eq!(
                &[(1, Timing::Delayed), (2, Timing::Immediate)][..],
                graph.notifications(0),
            );
            assert!(graph.notifications(1).is_empty());
            assert!(graph.notifications(2).is_empty());
        }
    }

    mod order {
        use super::*;

        #[test]
        fn no_edges_means_declaration_order() {
            let resources = vec![resource("c", &[]), resource("a", &[]), resource("b", &[])];
            let graph = Graph::build(&resources).unwrap();
            assert_eq!(vec![0, 1, 2], graph.order().unwrap());
        }

        #[test]
        fn respects_require_edges() {
            let resources = vec![
                resource("a", &["command c"]),
                resource("b", &[]),
                resource("c", &[]),
            ];
            let graph = Graph::build(&resources).unwrap();
            assert_eq!(vec![1, 2, 0], graph.order().unwrap());
        }

        #[test]
        fn notify_implies_ordering() {
            let mut a = resource("a", &[]);
            a.notify.push(Notify {
                target: "command b".to_owned(),
                timing: Timing::Delayed,
            });
            // b is declared first but must wait for its notifier.
            let resources = vec![resource("b", &[]), a];
            let graph = Graph::build(&resources).unwrap();
            assert_eq!(vec![1, 0], graph.order().unwrap());
        }

        #[test]
        fn is_deterministic() {
            let resources = vec![
                resource("d", &["command b"]),
                resource("b", &[]),
                resource("c", &["command b"]),
                resource("a", &[]),
            ];
            let graph = Graph::build(&resources).unwrap();
            let first = graph.order().unwrap();
            let second = graph.order().unwrap();
            assert_eq!(first, second);

            // Unblocked resources run earliest-declared first: once b releases them, d and c
            // slot back in by declaration index.
            assert_eq!(vec![1, 0, 2, 3], first);
        }

        #[test]
        fn cycle_names_both_participants() {
            let resources = vec![
                resource("a", &["command b"]),
                resource("b", &["command a"]),
            ];
            let graph = Graph::build(&resources).unwrap();
            assert_eq!(
                Err(Error::Cycle(vec![
                    "command a".to_owned(),
                    "command b".to_owned(),
                ])),
                graph.order(),
            );
        }

        #[test]
        fn self_reference_is_a_cycle() {
            let resources = vec![resource("a", &["command a"])];
            let graph = Graph::build(&resources).unwrap();
            assert_eq!(
                Err(Error::Cycle(vec!["command a".to_owned()])),
                graph.order(),
            );
        }
    }

    mod dependents {
        use super::*;

        #[test]
        fn walks_transitively() {
            let resources = vec![
                resource("a", &[]),
                resource("b", &["command a"]),
                resource("c", &["command b"]),
                resource("d", &[]),
            ];
            let graph = Graph::build(&resources).unwrap();

            let mut dependents = graph.dependents(0);
            dependents.sort_unstable();
            assert_eq!(vec![1, 2], dependents);
            assert!(graph.dependents(3).is_empty());
        }
    }
}
