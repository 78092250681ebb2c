use super::{LinkOutcome, RelationRepository};
use crate::domain::relation::EntityRef;
use crate::domain::types::{EntityType, RelationType};
use crate::repository::RepositoryError;
use std::sync::{Arc, Mutex};

fn setup_repo() -> RelationRepository {
    let conn = crate::db::open_in_memory().unwrap();
    RelationRepository::new(Arc::new(Mutex::new(conn)))
}

#[test]
fn test_link_is_idempotent() {
    let repo = setup_repo();

    let first = repo.link_worker_to_station(1, 10).unwrap();
    let second = repo.link_worker_to_station(1, 10).unwrap();

    assert!(first.is_created());
    assert_eq!(second, LinkOutcome::AlreadyLinked(first.relation_id()));
    assert_eq!(repo.stations_for_worker(1).unwrap(), vec![10]);
}

#[test]
fn test_unlink_then_link_restores_relation() {
    let repo = setup_repo();

    repo.link_worker_to_station(1, 10).unwrap();
    assert!(repo.unlink_worker_from_station(1, 10).unwrap());
    assert!(repo.stations_for_worker(1).unwrap().is_empty());
    assert!(!repo.unlink_worker_from_station(1, 10).unwrap());

    let restored = repo.link_worker_to_station(1, 10).unwrap();
    assert!(restored.is_created());
    assert_eq!(repo.stations_for_worker(1).unwrap(), vec![10]);
}

#[test]
fn test_conflicting_priority_is_duplicate() {
    let repo = setup_repo();

    repo.link_node_to_station(5, 10, 1).unwrap();
    let err = repo.link_node_to_station(5, 10, 2).unwrap_err();

    assert!(matches!(err, RepositoryError::DuplicateRelation(_)));
    // 原关系保持不变
    let stations = repo.candidate_stations(5).unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0].priority, 1);
}

#[test]
fn test_query_orders_by_priority() {
    let repo = setup_repo();

    repo.link_node_to_station(5, 30, 3).unwrap();
    repo.link_node_to_station(5, 10, 1).unwrap();
    repo.link_node_to_station(5, 20, 2).unwrap();

    let targets = repo
        .query(EntityRef::node(5), RelationType::NodeStation)
        .unwrap();
    let ids: Vec<i64> = targets.iter().map(|t| t.target_id).collect();
    assert_eq!(ids, vec![10, 20, 30]);
    assert_eq!(targets[0].priority, Some(1));
}

#[test]
fn test_reverse_lookup_for_impact_analysis() {
    let repo = setup_repo();

    repo.link_worker_to_station(1, 10).unwrap();
    repo.link_worker_to_station(2, 10).unwrap();
    repo.link_worker_to_station(3, 11).unwrap();

    let sources = repo.reverse(RelationType::WorkerStation, 10).unwrap();
    assert_eq!(
        sources,
        vec![EntityRef::worker(1), EntityRef::worker(2)]
    );
    assert_eq!(repo.workers_for_station(10).unwrap(), vec![1, 2]);
}

#[test]
fn test_endpoint_types_are_checked() {
    let repo = setup_repo();

    let err = repo
        .link(
            EntityRef::station(1),
            RelationType::WorkerStation,
            EntityRef::station(2),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ValidationError(_)));

    let err = repo.link_node_to_predecessor(7, 7).unwrap_err();
    assert!(matches!(err, RepositoryError::ValidationError(_)));
}

#[test]
fn test_purge_entity_removes_both_directions() {
    let repo = setup_repo();

    repo.link_node_to_predecessor(2, 1).unwrap();
    repo.link_node_to_predecessor(3, 2).unwrap();
    repo.link_node_to_station(2, 10, 1).unwrap();

    let removed = repo.purge_entity(EntityRef::node(2)).unwrap();
    assert_eq!(removed, 3);
    assert!(repo.predecessors_of(3).unwrap().is_empty());
    assert!(repo.successors_of(1).unwrap().is_empty());
}

#[test]
fn test_list_for_source_and_capability_queries() {
    let repo = setup_repo();

    repo.link_station_to_operation(10, 100).unwrap();
    repo.link_station_to_operation(11, 100).unwrap();
    repo.link_worker_to_operation(1, 100).unwrap();

    assert_eq!(repo.stations_for_operation(100).unwrap(), vec![10, 11]);
    assert_eq!(repo.workers_qualified_for(100).unwrap(), vec![1]);

    let rows = repo.list_for_source(EntityRef::station(10)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target.entity_type, EntityType::Operation);
}
