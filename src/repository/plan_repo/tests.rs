use super::{PlanNodeRepository, PlanRepository};
use crate::domain::plan::{NewPlanNode, ProductionPlan};
use crate::domain::types::PlanStatus;
use crate::repository::relation_repo::RelationRepository;
use crate::repository::RepositoryError;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn setup() -> (Arc<Mutex<Connection>>, i64) {
    let conn = Arc::new(Mutex::new(crate::db::open_in_memory().unwrap()));
    let plan_repo = PlanRepository::new(conn.clone());
    let plan_id = plan_repo
        .create(&ProductionPlan {
            plan_id: 0,
            code: "PP-2026-0001".to_string(),
            name: "测试计划".to_string(),
            status: PlanStatus::Draft,
            target_quantity: 10.0,
            default_efficiency: 0.9,
            planned_start: None,
            created_by: "tester".to_string(),
            created_at: ts(),
            updated_at: ts(),
            released_at: None,
            launched_at: None,
            completed_at: None,
        })
        .unwrap();
    (conn, plan_id)
}

#[test]
fn test_plan_create_and_status_update() {
    let (conn, plan_id) = setup();
    let repo = PlanRepository::new(conn);

    let plan = repo.get(plan_id).unwrap();
    assert_eq!(plan.code, "PP-2026-0001");
    assert_eq!(plan.status, PlanStatus::Draft);
    assert!(repo.find_by_code("PP-2026-0001").unwrap().is_some());

    repo.update_status(plan_id, PlanStatus::Draft, PlanStatus::Released, ts())
        .unwrap();
    let plan = repo.get(plan_id).unwrap();
    assert_eq!(plan.status, PlanStatus::Released);
    assert_eq!(plan.released_at, Some(ts()));

    // 前置状态不符
    let err = repo
        .update_status(plan_id, PlanStatus::Draft, PlanStatus::Released, ts())
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
    assert_eq!(repo.list_by_status(PlanStatus::Released).unwrap().len(), 1);
}

#[test]
fn test_duplicate_plan_code_rejected() {
    let (conn, plan_id) = setup();
    let repo = PlanRepository::new(conn);
    let mut dup = repo.get(plan_id).unwrap();
    dup.name = "另一个".to_string();
    assert!(matches!(
        repo.create(&dup),
        Err(RepositoryError::UniqueConstraintViolation(_))
    ));
}

#[test]
fn test_node_with_relations_roundtrip() {
    let (conn, plan_id) = setup();
    let repo = PlanNodeRepository::new(conn);

    let a = repo
        .insert_with_relations(
            plan_id,
            &NewPlanNode::new(100, "下料", 60.0)
                .with_efficiency(0.85)
                .with_station(11, 2)
                .with_station(10, 1)
                .with_output("BLANK", 10.0),
        )
        .unwrap();
    let b = repo
        .insert_with_relations(
            plan_id,
            &NewPlanNode::new(101, "焊接", 120.0)
                .with_station(20, 1)
                .with_substation(201)
                .with_predecessor(a.node_id)
                .with_input("BLANK", 1.0, true),
        )
        .unwrap();

    let loaded = repo.get(b.node_id).unwrap();
    assert_eq!(loaded.predecessors, vec![a.node_id]);
    assert_eq!(loaded.required_substations, vec![201]);
    assert_eq!(loaded.material_inputs.len(), 1);
    assert!(loaded.material_inputs[0].from_prior_node);

    let nodes = repo.list_by_plan(plan_id).unwrap();
    assert_eq!(nodes.len(), 2);
    let stations: Vec<i64> = nodes[0].candidate_stations.iter().map(|c| c.station_id).collect();
    assert_eq!(stations, vec![10, 11]);
    assert_eq!(nodes[0].efficiency, Some(0.85));
}

#[test]
fn test_node_insert_is_atomic() {
    let (conn, plan_id) = setup();
    let repo = PlanNodeRepository::new(conn);

    // 同一工位两个不同优先级 → DuplicateRelation, 节点行一并回滚
    let err = repo
        .insert_with_relations(
            plan_id,
            &NewPlanNode::new(100, "A", 10.0).with_station(10, 1).with_station(10, 2),
        )
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateRelation(_)));
    assert!(repo.list_by_plan(plan_id).unwrap().is_empty());

    // 前置节点不存在
    let err = repo
        .insert_with_relations(plan_id, &NewPlanNode::new(100, "B", 10.0).with_predecessor(999))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
    assert!(repo.list_by_plan(plan_id).unwrap().is_empty());
}

#[test]
fn test_set_predecessors_and_delete_cascade() {
    let (conn, plan_id) = setup();
    let repo = PlanNodeRepository::new(conn.clone());
    let relations = RelationRepository::new(conn);

    let a = repo.insert_with_relations(plan_id, &NewPlanNode::new(1, "A", 10.0)).unwrap();
    let b = repo.insert_with_relations(plan_id, &NewPlanNode::new(1, "B", 10.0)).unwrap();
    let c = repo
        .insert_with_relations(plan_id, &NewPlanNode::new(1, "C", 10.0).with_predecessor(a.node_id))
        .unwrap();

    repo.set_predecessors(c.node_id, &[b.node_id, a.node_id, b.node_id])
        .unwrap();
    assert_eq!(repo.get(c.node_id).unwrap().predecessors, vec![a.node_id, b.node_id]);

    assert!(repo.delete_with_relations(a.node_id).unwrap());
    assert_eq!(repo.get(c.node_id).unwrap().predecessors, vec![b.node_id]);
    assert!(relations.successors_of(a.node_id).unwrap().is_empty());
    assert!(!repo.delete_with_relations(a.node_id).unwrap());
}
