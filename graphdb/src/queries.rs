use anyhow::Result;
use async_trait::async_trait;
use contracts::System;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::CypherClient;

/// A package returned by direct resolution, carrying the highest
/// version the graph currently knows.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageCandidate {
    pub name: String,
    pub version: Option<String>,
}

/// One recorded breaking upgrade between two versions of a package.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeEvidence {
    pub from: String,
    pub to: String,
    pub percent_broken: f64,
}

/// The read-only query surface the inference pipeline needs from the
/// knowledge graph.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Packages whose resource names begin with `name`
    /// (case-insensitive) or whose own name equals `name`, each with
    /// its highest known version.
    async fn resource_packages(&self, name: &str, system: System)
        -> Result<Vec<PackageCandidate>>;

    /// Packages reachable from `name` by an outgoing
    /// resource-dependency hop.
    async fn resource_dependencies(&self, name: &str, system: System) -> Result<Vec<String>>;

    /// Packages reachable from `name` through an association pair.
    async fn association_dependencies(&self, name: &str, system: System) -> Result<Vec<String>>;

    /// Recorded breaking upgrades for `name`, sorted by decreasing
    /// `percent_broken`. Only rows with `percent_broken > 0` qualify.
    async fn upgrade_evidence(&self, name: &str, system: System) -> Result<Vec<UpgradeEvidence>>;

    /// Whether any upgrade subgraph exists for `name`, so callers can
    /// tell "no matrix present" from "empty matrix".
    async fn has_upgrades(&self, name: &str, system: System) -> Result<bool>;
}

/// [`KnowledgeGraph`] backed by the graph database.
#[derive(Clone)]
pub struct GraphResolver {
    client: CypherClient,
}

impl GraphResolver {
    pub fn new(client: CypherClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Self {
        Self::new(CypherClient::from_env())
    }
}

fn string_at(row: &[Value], index: usize) -> Option<String> {
    row.get(index).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl KnowledgeGraph for GraphResolver {
    async fn resource_packages(
        &self,
        name: &str,
        system: System,
    ) -> Result<Vec<PackageCandidate>> {
        let statement = "\
MATCH (p:package {system: $system})-[:version]->(v:version)-[:resource]->(r:resource) \
WHERE toLower(r.name) STARTS WITH toLower($name) OR p.name = $name \
RETURN p.name AS package, max(v.name) AS version";
        let rows = self
            .client
            .execute(statement, json!({"name": name, "system": system.as_str()}))
            .await?;

        let candidates = rows
            .iter()
            .filter_map(|row| {
                string_at(row, 0).map(|package| PackageCandidate {
                    name: package,
                    version: string_at(row, 1),
                })
            })
            .collect::<Vec<_>>();
        debug!(resource = name, count = candidates.len(), "resource lookup");
        Ok(candidates)
    }

    async fn resource_dependencies(&self, name: &str, system: System) -> Result<Vec<String>> {
        let statement = "\
MATCH (p:package {name: $name, system: $system})-[:version]->(:version)\
-[:resource_dependency]->(r:resource)<-[:resource]-(:version)\
<-[:version]-(p2:package {system: $system}) \
RETURN DISTINCT p2.name";
        let rows = self
            .client
            .execute(statement, json!({"name": name, "system": system.as_str()}))
            .await?;
        Ok(rows.iter().filter_map(|row| string_at(row, 0)).collect())
    }

    async fn association_dependencies(&self, name: &str, system: System) -> Result<Vec<String>> {
        let statement = "\
MATCH (p:package {name: $name, system: $system})-[:association]->(:association)\
-[:association]->(p2:package {system: $system}) \
RETURN DISTINCT p2.name";
        let rows = self
            .client
            .execute(statement, json!({"name": name, "system": system.as_str()}))
            .await?;
        Ok(rows.iter().filter_map(|row| string_at(row, 0)).collect())
    }

    async fn upgrade_evidence(&self, name: &str, system: System) -> Result<Vec<UpgradeEvidence>> {
        let statement = "\
MATCH (p:package {name: $name, system: $system})-[:version]->(v1:version)\
<-[:upgrade]-(u:upgrade)-[:upgrade]->(v2:version) \
WHERE u.percent_broken > 0 \
RETURN v1.name AS from, v2.name AS to, u.percent_broken AS percentBroken \
ORDER BY u.percent_broken DESC";
        let rows = self
            .client
            .execute(statement, json!({"name": name, "system": system.as_str()}))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let from = string_at(row, 0)?;
                let to = string_at(row, 1)?;
                let percent_broken = row.get(2).and_then(Value::as_f64)?;
                Some(UpgradeEvidence {
                    from,
                    to,
                    percent_broken,
                })
            })
            .collect())
    }

    async fn has_upgrades(&self, name: &str, system: System) -> Result<bool> {
        let statement = "\
MATCH (p:package {name: $name, system: $system})-[:version]->(:version)\
<-[:upgrade]-(u:upgrade) \
RETURN count(u) > 0";
        let rows = self
            .client
            .execute(statement, json!({"name": name, "system": system.as_str()}))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}
