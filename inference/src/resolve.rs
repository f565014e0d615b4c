//! Dependency resolution: imported resources to direct dependencies,
//! then the transitive closure in installation order.

use std::collections::HashSet;

use anyhow::Result;
use contracts::{Dependency, Environment, ResourceMapping, System};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use graphdb::KnowledgeGraph;
use tracing::{debug, info, warn};

/// Which prerequisite edge kinds the transitive closure follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSelection {
    /// Union of resource-dependency and association edges.
    Union,
    /// Resource-dependency edges only.
    Deps,
    /// Association edges only.
    Assoc,
    /// No transitive resolution at all.
    None,
}

impl std::str::FromStr for EdgeSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deps" => Ok(EdgeSelection::Deps),
            "assoc" => Ok(EdgeSelection::Assoc),
            "none" => Ok(EdgeSelection::None),
            other => anyhow::bail!("unknown edge selection '{}'", other),
        }
    }
}

/// Bound on concurrent per-resource resolution work.
const RESOLVE_CONCURRENCY: usize = 8;

/// Everything learned about one resource before the sequential merge.
struct ResourceLookup {
    resource: String,
    /// Matched candidates from the knowledge graph, in query order.
    graph_matches: Vec<Dependency>,
    /// Exact match on the resource name itself, for the fallback.
    direct_match: Option<Dependency>,
}

/// Resolve the environment's imported resources into direct
/// dependencies, then (per `selection`) expand the transitive closure
/// and set the installation order.
pub async fn resolve_environment(
    env: &mut Environment,
    graph: &dyn KnowledgeGraph,
    selection: EdgeSelection,
) -> Result<()> {
    let Some(parse) = env.metadata.parse.clone() else {
        anyhow::bail!("environment {} has no parse result to resolve", env.id);
    };
    let system = parse.language.system;
    let resources = parse.imported_resources();
    info!(id = %env.id, resources = resources.len(), "resolving direct dependencies");

    // Per-resource graph queries and adapter lookups run concurrently;
    // the dedup/merge below stays sequential to keep discovery order.
    let lookups: Vec<ResourceLookup> = stream::iter(resources)
        .map(|resource| lookup_resource(resource, graph, system))
        .buffered(RESOLVE_CONCURRENCY)
        .try_collect()
        .await?;

    merge_direct_lookups(env, lookups, system);

    if selection == EdgeSelection::None {
        env.dependencies = env.metadata.direct_lookup.clone();
        return Ok(());
    }

    let ordered = transitive_closure(
        graph,
        &env.metadata.direct_lookup,
        system,
        selection,
    )
    .await?;

    env.metadata.transitive_lookup = ordered
        .iter()
        .filter(|dep| {
            !env.metadata
                .direct_lookup
                .iter()
                .any(|direct| direct.name == dep.name)
        })
        .cloned()
        .collect();
    env.dependencies = ordered;
    Ok(())
}

async fn lookup_resource(
    resource: String,
    graph: &dyn KnowledgeGraph,
    system: System,
) -> Result<ResourceLookup> {
    // Graph failures propagate; adapter lookups recover locally
    // inside exact_match.
    let candidates = graph.resource_packages(&resource, system).await?;
    let adapter = systems::adapter_for(system);

    let mut graph_matches = Vec::new();
    for candidate in candidates {
        if let Some(dep) = adapter.exact_match(&candidate.name, None).await? {
            graph_matches.push(dep);
        }
    }
    let direct_match = adapter.exact_match(&resource, None).await?;

    Ok(ResourceLookup {
        resource,
        graph_matches,
        direct_match,
    })
}

/// Sequential merge implementing the lookup-list rules: graph matches
/// append unless already present, the resource name itself is the
/// fallback, and `name_resolutions` counts only non-trivial
/// resolutions. An exact-name entry satisfies a resource no matter
/// which resource's processing put it in the list.
fn merge_direct_lookups(env: &mut Environment, lookups: Vec<ResourceLookup>, system: System) {
    let adapter = systems::adapter_for(system);
    let key = |name: &str| (adapter.normalize_name(name), system);

    for lookup in lookups {
        let resource_key = key(&lookup.resource);
        // An exact-name entry may predate this resource entirely,
        // pushed while an earlier resource was processed.
        let exact_name_preexisted = env
            .metadata
            .direct_lookup
            .iter()
            .any(|existing| key(&existing.name) == resource_key);
        let mut pushed_exact_name = false;
        let mut resolved = false;

        for dep in lookup.graph_matches {
            let dep_key = key(&dep.name);
            if dep_key == resource_key {
                pushed_exact_name = true;
            }

            let mapping = ResourceMapping {
                resource: lookup.resource.clone(),
                package: dep.name.clone(),
            };
            if !env.metadata.resource_package_mapping.contains(&mapping) {
                env.metadata.resource_package_mapping.push(mapping);
            }

            let already_present = env
                .metadata
                .direct_lookup
                .iter()
                .any(|existing| key(&existing.name) == dep_key);
            if already_present {
                resolved = true;
                continue;
            }
            env.metadata.name_resolutions += 1;
            env.metadata.direct_lookup.push(dep);
            resolved = true;
        }

        if exact_name_preexisted || pushed_exact_name {
            // The resource is satisfied by an entry carrying its own
            // name, so this resolution was trivial; the counter only
            // measures non-trivial resolutions.
            resolved = true;
            env.metadata.name_resolutions -= 1;

            let package = env
                .metadata
                .direct_lookup
                .iter()
                .find(|existing| key(&existing.name) == resource_key)
                .map(|existing| existing.name.clone());
            if let Some(package) = package {
                let mapping = ResourceMapping {
                    resource: lookup.resource.clone(),
                    package,
                };
                if !env.metadata.resource_package_mapping.contains(&mapping) {
                    env.metadata.resource_package_mapping.push(mapping);
                }
            }
        } else if let Some(dep) = lookup.direct_match {
            env.metadata.resource_package_mapping.push(ResourceMapping {
                resource: lookup.resource.clone(),
                package: dep.name.clone(),
            });
            env.metadata.direct_lookup.push(dep);
            resolved = true;
        }

        if !resolved {
            warn!(resource = %lookup.resource, "resource did not resolve to any package");
            env.metadata.unresolved_resources.push(lookup.resource);
        }
    }
}

/// Reverse DFS over the prerequisite graph. The returned list is the
/// DFS post-order: every dependency follows its discovered
/// prerequisites, with the roots at their natural post-order
/// positions. A visited set keyed by normalized name breaks cycles at
/// discovery time.
pub async fn transitive_closure(
    graph: &dyn KnowledgeGraph,
    roots: &[Dependency],
    system: System,
    selection: EdgeSelection,
) -> Result<Vec<Dependency>> {
    let adapter = systems::adapter_for(system);
    let normalize = |name: &str| adapter.normalize_name(name);

    let mut visited: HashSet<String> = HashSet::new();
    let mut order: Vec<Dependency> = Vec::new();

    struct Frame {
        dep: Dependency,
        children: Vec<String>,
        next: usize,
    }

    for root in roots {
        let root_key = normalize(&root.name);
        if !visited.insert(root_key) {
            continue;
        }

        let children = prerequisites(graph, &root.name, system, selection).await?;
        let mut stack = vec![Frame {
            dep: root.clone(),
            children,
            next: 0,
        }];

        while let Some(top) = stack.last_mut() {
            if top.next < top.children.len() {
                let child_name = top.children[top.next].clone();
                top.next += 1;

                if !visited.insert(normalize(&child_name)) {
                    continue;
                }

                // A prerequisite that is itself a root keeps its pin.
                let child_dep = roots
                    .iter()
                    .find(|r| normalize(&r.name) == normalize(&child_name))
                    .cloned()
                    .unwrap_or_else(|| Dependency::unpinned(child_name.clone(), system));

                let grandchildren =
                    prerequisites(graph, &child_dep.name, system, selection).await?;
                stack.push(Frame {
                    dep: child_dep,
                    children: grandchildren,
                    next: 0,
                });
            } else {
                let frame = stack.pop().expect("dfs stack underflow");
                debug!(package = %frame.dep.name, "install-order position assigned");
                order.push(frame.dep);
            }
        }
    }

    Ok(order)
}

async fn prerequisites(
    graph: &dyn KnowledgeGraph,
    name: &str,
    system: System,
    selection: EdgeSelection,
) -> Result<Vec<String>> {
    let mut children = Vec::new();
    if matches!(selection, EdgeSelection::Union | EdgeSelection::Deps) {
        children.extend(graph.resource_dependencies(name, system).await?);
    }
    if matches!(selection, EdgeSelection::Union | EdgeSelection::Assoc) {
        for assoc in graph.association_dependencies(name, system).await? {
            if !children.contains(&assoc) {
                children.push(assoc);
            }
        }
    }
    Ok(children)
}
