//! Ownership graph construction
//!
//! Breadth-first traversal over the persisted holdings, bounded by the
//! depth ceiling. "Up" walks who owns the root; "down" walks what the root
//! owns; "both" runs both from the same root. Queries are read-only and
//! stateless, so any number may run concurrently.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::backend::RegistryBackend;
use crate::error::RegistryError;
use crate::registry::types::{CompanyShareholder, EntityKey, EntityType, ShareEntity};

use super::types::{Direction, GraphEdge, GraphNode, GraphQuery, OwnershipGraph};

/// Read-side service assembling ownership graphs from the backend tables.
pub struct OwnershipGraphService<'a> {
    backend: &'a dyn RegistryBackend,
}

impl<'a> OwnershipGraphService<'a> {
    pub fn new(backend: &'a dyn RegistryBackend) -> Self {
        Self { backend }
    }

    /// Materialize the node/edge view for one query.
    pub async fn fetch_ownership_graph(
        &self,
        query: &GraphQuery,
    ) -> Result<OwnershipGraph, RegistryError> {
        let depth = query.bounded_depth();
        let root_key = EntityKey::org(&query.orgnr);

        let mut graph = OwnershipGraph {
            year: query.year,
            ..Default::default()
        };
        let mut nodes: HashMap<String, GraphNode> = HashMap::new();
        let mut edge_seen: HashSet<(String, String, String)> = HashSet::new();

        let root_name = match self.backend.company_by_orgnr(&query.orgnr).await? {
            Some(company) => company.name,
            None => self
                .entity_names(&[root_key.clone()])
                .await?
                .remove(&root_key)
                .map(|e| e.name)
                .unwrap_or_else(|| query.orgnr.clone()),
        };
        nodes.insert(
            root_key.as_str().to_string(),
            GraphNode {
                id: root_key.as_str().to_string(),
                name: root_name,
                node_type: EntityType::Company,
                orgnr: Some(query.orgnr.clone()),
                depth: 0,
            },
        );

        if matches!(query.direction, Direction::Up | Direction::Both) {
            self.traverse_up(query, depth, &mut nodes, &mut edge_seen, &mut graph)
                .await?;
        }
        if matches!(query.direction, Direction::Down | Direction::Both) {
            self.traverse_down(query, depth, &mut nodes, &mut edge_seen, &mut graph)
                .await?;
        }

        graph.nodes = nodes.into_values().collect();
        graph.nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.id.cmp(&b.id)));
        debug!(
            orgnr = %query.orgnr,
            year = query.year,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "ownership graph materialized"
        );
        Ok(graph)
    }

    /// Walk holders of each frontier company, expanding company holders
    /// further up until the depth bound.
    async fn traverse_up(
        &self,
        query: &GraphQuery,
        depth: u32,
        nodes: &mut HashMap<String, GraphNode>,
        edge_seen: &mut HashSet<(String, String, String)>,
        graph: &mut OwnershipGraph,
    ) -> Result<(), RegistryError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
        frontier.push_back((query.orgnr.clone(), 0));

        while let Some((orgnr, level)) = frontier.pop_front() {
            if !visited.insert(orgnr.clone()) {
                continue;
            }
            if level >= depth {
                // Truncation only counts when something actually lies beyond
                // the bound, not merely because a leaf sits on it.
                let beyond = self.backend.holdings_of_company(&orgnr, query.year).await?;
                if !beyond.is_empty() {
                    graph.truncated_at_depth = true;
                }
                continue;
            }
            let holdings = self.backend.holdings_of_company(&orgnr, query.year).await?;
            if holdings.is_empty() {
                continue;
            }
            let total: u64 = holdings.iter().map(|h| h.shares).sum();
            let holder_keys: Vec<EntityKey> =
                holdings.iter().map(|h| h.holder.clone()).collect();
            let entities = self.entity_names(&holder_keys).await?;
            let company_id = EntityKey::org(&orgnr).as_str().to_string();

            for holding in holdings {
                let holder_id = holding.holder.as_str().to_string();
                let entity = entities.get(&holding.holder);
                nodes.entry(holder_id.clone()).or_insert_with(|| GraphNode {
                    id: holder_id.clone(),
                    name: entity
                        .map(|e| e.name.clone())
                        .unwrap_or_else(|| "Unknown Entity".to_string()),
                    node_type: if holding.holder.is_org() {
                        EntityType::Company
                    } else {
                        EntityType::Person
                    },
                    orgnr: holding.holder.orgnr().map(String::from),
                    depth: level + 1,
                });
                if edge_seen.insert((
                    holder_id.clone(),
                    company_id.clone(),
                    holding.share_class.clone(),
                )) {
                    graph.edges.push(GraphEdge {
                        from: holder_id,
                        to: company_id.clone(),
                        share_class: holding.share_class.clone(),
                        shares: holding.shares,
                        ownership_pct: (total > 0)
                            .then(|| holding.shares as f64 * 100.0 / total as f64),
                    });
                }
                // Company holders may themselves be owned; keep climbing.
                if let Some(parent_orgnr) = holding.holder.orgnr() {
                    frontier.push_back((parent_orgnr.to_string(), level + 1));
                }
            }
        }
        Ok(())
    }

    /// Walk holdings of each frontier entity: everything it owns, then
    /// everything those companies own, until the depth bound.
    async fn traverse_down(
        &self,
        query: &GraphQuery,
        depth: u32,
        nodes: &mut HashMap<String, GraphNode>,
        edge_seen: &mut HashSet<(String, String, String)>,
        graph: &mut OwnershipGraph,
    ) -> Result<(), RegistryError> {
        let mut visited: HashSet<EntityKey> = HashSet::new();
        let mut frontier: VecDeque<(EntityKey, u32)> = VecDeque::new();
        frontier.push_back((EntityKey::org(&query.orgnr), 0));

        while let Some((key, level)) = frontier.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if level >= depth {
                let beyond = self.backend.holdings_of_holder(&key, query.year).await?;
                if !beyond.is_empty() {
                    graph.truncated_at_depth = true;
                }
                continue;
            }
            let holdings = self.backend.holdings_of_holder(&key, query.year).await?;
            let owner_id = key.as_str().to_string();

            for holding in holdings {
                let owned_key = EntityKey::org(&holding.company_orgnr);
                let owned_id = owned_key.as_str().to_string();
                if !nodes.contains_key(&owned_id) {
                    let name = self
                        .backend
                        .company_by_orgnr(&holding.company_orgnr)
                        .await?
                        .map(|c| c.name)
                        .unwrap_or_else(|| holding.company_orgnr.clone());
                    nodes.insert(
                        owned_id.clone(),
                        GraphNode {
                            id: owned_id.clone(),
                            name,
                            node_type: EntityType::Company,
                            orgnr: Some(holding.company_orgnr.clone()),
                            depth: level + 1,
                        },
                    );
                }
                if edge_seen.insert((
                    owner_id.clone(),
                    owned_id.clone(),
                    holding.share_class.clone(),
                )) {
                    graph.edges.push(GraphEdge {
                        from: owner_id.clone(),
                        to: owned_id.clone(),
                        share_class: holding.share_class,
                        shares: holding.shares,
                        ownership_pct: None,
                    });
                }
                frontier.push_back((owned_key, level + 1));
            }
        }
        Ok(())
    }

    /// Direct holders of one company, joined to their entity records.
    ///
    /// Holders without a resolvable entity record are returned with the
    /// "Unknown Entity" placeholder rather than omitted, so the holding
    /// total stays complete.
    pub async fn get_company_shareholders(
        &self,
        orgnr: &str,
        year: i32,
    ) -> Result<Vec<CompanyShareholder>, RegistryError> {
        let holdings = self.backend.holdings_of_company(orgnr, year).await?;
        let total: u64 = holdings.iter().map(|h| h.shares).sum();
        let keys: Vec<EntityKey> = holdings.iter().map(|h| h.holder.clone()).collect();
        let entities = self.entity_names(&keys).await?;

        let mut shareholders: Vec<CompanyShareholder> = holdings
            .into_iter()
            .map(|holding| {
                let ownership_pct = if total > 0 {
                    holding.shares as f64 * 100.0 / total as f64
                } else {
                    0.0
                };
                CompanyShareholder {
                    entity: entities.get(&holding.holder).cloned(),
                    holder: holding.holder,
                    share_class: holding.share_class,
                    shares: holding.shares,
                    ownership_pct,
                }
            })
            .collect();
        shareholders.sort_by(|a, b| b.shares.cmp(&a.shares));
        Ok(shareholders)
    }

    async fn entity_names(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, ShareEntity>, RegistryError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let entities = self.backend.entities_by_keys(keys).await?;
        Ok(entities.into_iter().map(|e| (e.key.clone(), e)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BatchInfo, IngestBatchRequest, MemoryBackend};
    use crate::registry::types::ShareholderRow;

    fn row(
        company_orgnr: &str,
        company_name: &str,
        holder_name: &str,
        holder_orgnr: Option<&str>,
        shares: u64,
    ) -> ShareholderRow {
        ShareholderRow {
            company_orgnr: company_orgnr.into(),
            company_name: company_name.into(),
            holder_name: holder_name.into(),
            holder_orgnr: holder_orgnr.map(String::from),
            holder_birth_year: holder_orgnr.is_none().then_some(1970),
            holder_country: "NO".into(),
            share_class: "Ordinære aksjer".into(),
            shares,
            company_total_shares: None,
        }
    }

    async fn seed(backend: &MemoryBackend, rows: Vec<ShareholderRow>, year: i32) {
        let session = backend.start_session(year, false).await.unwrap();
        backend
            .ingest_batch(IngestBatchRequest {
                session_id: session.session_id,
                year,
                is_global: false,
                batch_info: BatchInfo {
                    current: 1,
                    total: 1,
                },
                data: rows,
            })
            .await
            .unwrap();
    }

    /// Holding chain: Holdco owns Mid, Mid owns Op, Ola owns Holdco.
    async fn chain_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        seed(
            &backend,
            vec![
                row("911111111", "Opco AS", "Mid AS", Some("922222222"), 100),
                row("922222222", "Mid AS", "Holdco AS", Some("933333333"), 50),
                row("933333333", "Holdco AS", "Ola Nordmann", None, 30),
            ],
            2024,
        )
        .await;
        backend
    }

    #[tokio::test]
    async fn down_depth_1_edges_all_start_at_root() {
        let backend = chain_backend().await;
        let service = OwnershipGraphService::new(&backend);
        let root = EntityKey::org("933333333");

        let query = GraphQuery::new("933333333", 2024)
            .direction(Direction::Down)
            .depth(1);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();

        assert!(!graph.edges.is_empty());
        for edge in &graph.edges {
            assert_eq!(edge.from, root.as_str());
        }
        assert!(graph.node(root.as_str()).is_some());
        assert!(graph.node(EntityKey::org("922222222").as_str()).is_some());
        // Depth 1 must not reach the operating company two hops down.
        assert!(graph.node(EntityKey::org("911111111").as_str()).is_none());
        assert!(graph.truncated_at_depth);
    }

    #[tokio::test]
    async fn up_traversal_climbs_company_holders() {
        let backend = chain_backend().await;
        let service = OwnershipGraphService::new(&backend);

        let query = GraphQuery::new("911111111", 2024)
            .direction(Direction::Up)
            .depth(3);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();

        // Opco <- Mid <- Holdco <- Ola
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.edges.len(), 3);
        let ola = EntityKey::person("Ola Nordmann", Some(1970), "NO");
        let ola_node = graph.node(ola.as_str()).unwrap();
        assert_eq!(ola_node.depth, 3);
        assert_eq!(ola_node.node_type, EntityType::Person);
    }

    #[tokio::test]
    async fn depth_bound_on_leaf_is_not_truncation() {
        let backend = chain_backend().await;
        let service = OwnershipGraphService::new(&backend);

        // Opco sits exactly on the bound and owns nothing further.
        let query = GraphQuery::new("922222222", 2024)
            .direction(Direction::Down)
            .depth(1);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();
        assert!(graph.node(EntityKey::org("911111111").as_str()).is_some());
        assert!(!graph.truncated_at_depth);
    }

    #[tokio::test]
    async fn up_truncation_reflects_owners_beyond_bound() {
        let backend = chain_backend().await;
        let service = OwnershipGraphService::new(&backend);

        // Holdco lands on the bound and is itself owned, so the view is cut.
        let query = GraphQuery::new("911111111", 2024)
            .direction(Direction::Up)
            .depth(2);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();
        assert!(graph.truncated_at_depth);

        // One level deeper reaches the end of the chain; nothing remains.
        let query = GraphQuery::new("911111111", 2024)
            .direction(Direction::Up)
            .depth(3);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();
        assert!(!graph.truncated_at_depth);
    }

    #[tokio::test]
    async fn up_edges_carry_ownership_percentage() {
        let backend = MemoryBackend::new();
        seed(
            &backend,
            vec![
                row("911111111", "Opco AS", "A AS", Some("922222222"), 75),
                row("911111111", "Opco AS", "B AS", Some("933333333"), 25),
            ],
            2024,
        )
        .await;
        let service = OwnershipGraphService::new(&backend);
        let query = GraphQuery::new("911111111", 2024)
            .direction(Direction::Up)
            .depth(1);
        let graph = service.fetch_ownership_graph(&query).await.unwrap();

        let a_edge = graph
            .edges
            .iter()
            .find(|e| e.from == EntityKey::org("922222222").as_str())
            .unwrap();
        assert_eq!(a_edge.ownership_pct, Some(75.0));
    }

    #[test]
    fn unresolved_holder_renders_placeholder() {
        let unknown = CompanyShareholder {
            holder: EntityKey::org("999999999"),
            entity: None,
            share_class: "Ordinære aksjer".into(),
            shares: 10,
            ownership_pct: 0.0,
        };
        assert_eq!(unknown.display_name(), "Unknown Entity");
    }

    #[tokio::test]
    async fn shareholders_join_entities_and_percentages() {
        let backend = chain_backend().await;
        let service = OwnershipGraphService::new(&backend);

        let shareholders = service
            .get_company_shareholders("911111111", 2024)
            .await
            .unwrap();
        assert_eq!(shareholders.len(), 1);
        assert_eq!(shareholders[0].display_name(), "Mid AS");
        assert_eq!(shareholders[0].ownership_pct, 100.0);

        // A different year has no holdings at all.
        let empty = service
            .get_company_shareholders("911111111", 2023)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
