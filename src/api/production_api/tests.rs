use super::*;

use crate::api::relation_api::RelationApi;
use crate::app::AppState;
use crate::domain::plan::{NewPlan, NewPlanNode};
use crate::domain::AssignmentEvent;
use crate::domain::types::AssignmentStatus;
use chrono::NaiveDate;
use rusqlite::Connection;

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn setup() -> (ProductionApi, Arc<RelationApi>) {
    let conn = Connection::open_in_memory().unwrap();
    let state = AppState::from_connection(conn, ":memory:".to_string()).unwrap();
    let relation_api = state.relation_api.clone();
    let api = match Arc::try_unwrap(state.production_api) {
        Ok(api) => api,
        Err(_) => panic!("production_api 仍被共享"),
    };
    (api.with_clock(t0), relation_api)
}

fn new_plan(name: &str) -> NewPlan {
    NewPlan {
        code: None,
        name: name.to_string(),
        target_quantity: 10.0,
        default_efficiency: Some(0.9),
        planned_start: None,
        created_by: "planner".to_string(),
    }
}

#[test]
fn test_create_plan_allocates_sequential_codes() {
    let (api, _) = setup();
    let p1 = api.create_plan(new_plan("a")).unwrap();
    let p2 = api.create_plan(new_plan("b")).unwrap();
    assert_eq!(p1.code, "PP-2026-0001");
    assert_eq!(p2.code, "PP-2026-0002");
    assert_eq!(p1.status, PlanStatus::Draft);
}

#[test]
fn test_create_plan_rejects_bad_efficiency() {
    let (api, _) = setup();
    let mut req = new_plan("a");
    req.default_efficiency = Some(0.0);
    assert!(matches!(api.create_plan(req), Err(ApiError::InvalidInput(_))));

    // 缺省时使用配置默认值
    let mut req = new_plan("b");
    req.default_efficiency = None;
    assert_eq!(api.create_plan(req).unwrap().default_efficiency, 1.0);
}

#[test]
fn test_add_node_rejects_unknown_predecessor() {
    let (api, _) = setup();
    let plan = api.create_plan(new_plan("a")).unwrap();
    let err = api
        .add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_station(10, 1).with_predecessor(999))
        .unwrap_err();
    assert!(matches!(err, ApiError::PlanValidationFailed { .. }));
    assert!(api.node_repo.list_by_plan(plan.plan_id).unwrap().is_empty());
}

#[test]
fn test_set_predecessors_cycle_is_rejected_without_mutation() {
    let (api, _) = setup();
    let plan = api.create_plan(new_plan("a")).unwrap();
    let a = api.add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_station(10, 1)).unwrap();
    let b = api
        .add_node(plan.plan_id, NewPlanNode::new(2, "B", 60.0).with_station(10, 1).with_predecessor(a.node_id))
        .unwrap();

    let err = api.set_predecessors(a.node_id, vec![b.node_id]).unwrap_err();
    match err {
        ApiError::CyclicDependency { cycle } => {
            assert!(cycle.contains(&a.node_id));
            assert!(cycle.contains(&b.node_id));
        }
        other => panic!("Expected CyclicDependency, got {:?}", other),
    }
    assert!(api.node_repo.get(a.node_id).unwrap().predecessors.is_empty());
}

#[test]
fn test_release_requires_nodes_and_locks_editing() {
    let (api, _) = setup();
    let plan = api.create_plan(new_plan("a")).unwrap();
    assert!(matches!(api.release_plan(plan.plan_id), Err(ApiError::InvalidInput(_))));

    api.add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_station(10, 1)).unwrap();
    let released = api.release_plan(plan.plan_id).unwrap();
    assert_eq!(released.status, PlanStatus::Released);
    assert!(released.released_at.is_some());

    let err = api
        .add_node(plan.plan_id, NewPlanNode::new(2, "B", 30.0).with_station(10, 1))
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition { .. }));
    assert!(matches!(api.release_plan(plan.plan_id), Err(ApiError::InvalidTransition { .. })));
}

#[test]
fn test_launch_assigns_auto_worker_and_sequences_queue() {
    let (api, relations) = setup();
    relations.link_worker_to_station(7, 10).unwrap();

    let plan = api.create_plan(new_plan("a")).unwrap();
    let a = api
        .add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_efficiency(0.85).with_station(10, 1))
        .unwrap();
    api.add_node(plan.plan_id, NewPlanNode::new(2, "B", 30.0).with_station(10, 1).with_predecessor(a.node_id))
        .unwrap();
    api.release_plan(plan.plan_id).unwrap();

    let launched = api.launch_plan(plan.plan_id).unwrap();
    assert_eq!(launched.len(), 2);
    assert!(launched.iter().all(|x| x.worker_id == Some(7)));
    assert!(launched.iter().all(|x| x.status == AssignmentStatus::Assigned));
    assert_eq!(launched[0].code, format!("{}-WP-001", plan.code));

    let queue = api.worker_queue(7).unwrap();
    let seqs: Vec<_> = queue.iter().map(|x| x.sequence_number).collect();
    assert_eq!(seqs, vec![Some(1), Some(2)]);
    assert_eq!(api.get_plan(plan.plan_id).unwrap().status, PlanStatus::Active);
}

#[test]
fn test_complete_all_finishes_plan() {
    let (api, relations) = setup();
    relations.link_worker_to_station(7, 10).unwrap();

    let plan = api.create_plan(new_plan("a")).unwrap();
    api.add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_station(10, 1)).unwrap();
    api.release_plan(plan.plan_id).unwrap();
    let launched = api.launch_plan(plan.plan_id).unwrap();
    let id = launched[0].assignment_id;

    api.transition(id, AssignmentEvent::Start).unwrap();
    let done = api.transition(id, AssignmentEvent::Complete { actual_output: None }).unwrap();
    assert_eq!(done.status, AssignmentStatus::Completed);
    assert_eq!(done.sequence_number, None);
    assert_eq!(api.get_plan(plan.plan_id).unwrap().status, PlanStatus::Completed);
}

#[test]
fn test_cancel_plan_cancels_open_assignments() {
    let (api, relations) = setup();
    relations.link_worker_to_station(7, 10).unwrap();

    let plan = api.create_plan(new_plan("a")).unwrap();
    api.add_node(plan.plan_id, NewPlanNode::new(1, "A", 60.0).with_station(10, 1)).unwrap();
    api.release_plan(plan.plan_id).unwrap();
    api.launch_plan(plan.plan_id).unwrap();

    let cancelled = api.cancel_plan(plan.plan_id, Some("订单撤销".to_string())).unwrap();
    assert_eq!(cancelled.status, PlanStatus::Cancelled);
    let all = api.list_assignments(plan.plan_id).unwrap();
    assert!(all.iter().all(|a| a.status == AssignmentStatus::Cancelled));
    assert_eq!(all[0].cancel_reason.as_deref(), Some("订单撤销"));
    assert!(api.worker_queue(7).unwrap().is_empty());
}
