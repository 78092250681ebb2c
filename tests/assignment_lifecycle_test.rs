// ==========================================
// 工单生命周期测试
// ==========================================
// 职责: 验证状态机合法性、物料预留/消耗/释放与计划自动完成
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod assignment_lifecycle_test {
    use shopfloor_exec::api::ApiError;
    use shopfloor_exec::domain::plan::NewPlanNode;
    use shopfloor_exec::domain::types::{AssignmentStatus, MaterialReservationStatus, PlanStatus};
    use shopfloor_exec::domain::{AssignmentEvent, WorkerAssignment};
    use shopfloor_exec::engine::ledger::MaterialLedger;

    use crate::test_helpers::{exec_sql, monday_at, new_plan, setup_env, TestEnv};

    /// 单节点计划: 投入 STEEL×2, 产出 PART×1
    fn launch_single(env: &TestEnv, efficiency: Option<f64>) -> WorkerAssignment {
        env.relations.link_worker_to_station(7, 10).unwrap();
        let plan = env.api.create_plan(new_plan("单工序", None)).unwrap();
        let mut node = NewPlanNode::new(1, "加工", 60.0)
            .with_station(10, 1)
            .with_input("STEEL", 2.0, false)
            .with_output("PART", 1.0);
        node.efficiency = efficiency;
        env.api.add_node(plan.plan_id, node).unwrap();
        env.api.release_plan(plan.plan_id).unwrap();
        env.api.launch_plan(plan.plan_id).unwrap().remove(0)
    }

    fn stock(env: &TestEnv, code: &str) -> (f64, f64) {
        let level = env.ledger.stock_of(code).unwrap().unwrap();
        (level.on_hand, level.reserved)
    }

    #[test]
    fn test_start_without_stock_keeps_assigned() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 1.0).unwrap();

        match env.api.transition(a.assignment_id, AssignmentEvent::Start) {
            Err(ApiError::InsufficientStock {
                material_code,
                requested,
                available,
            }) => {
                assert_eq!(material_code, "STEEL");
                assert_eq!(requested, 2.0);
                assert_eq!(available, 1.0);
            }
            other => panic!("Expected InsufficientStock, got {:?}", other.map(|a| a.status)),
        }

        let after = env.api.get_assignment(a.assignment_id).unwrap();
        assert_eq!(after.status, AssignmentStatus::Assigned);
        assert!(after.materials_reserved.is_empty());
        assert_eq!(stock(&env, "STEEL"), (1.0, 0.0));
    }

    #[test]
    fn test_full_lifecycle_moves_material() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();

        let started = env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        assert_eq!(started.status, AssignmentStatus::Started);
        assert_eq!(started.material_reservation_status, MaterialReservationStatus::Reserved);
        assert_eq!(started.started_at, Some(monday_at(8, 0)));
        assert_eq!(stock(&env, "STEEL"), (5.0, 2.0));

        let done = env
            .api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: None })
            .unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert_eq!(done.material_reservation_status, MaterialReservationStatus::Consumed);
        assert_eq!(done.materials_consumed.len(), 1);
        assert_eq!(stock(&env, "STEEL"), (3.0, 0.0));
        assert_eq!(stock(&env, "PART"), (1.0, 0.0));

        // 唯一工单完工后计划自动完成
        assert_eq!(env.api.get_plan(done.plan_id).unwrap().status, PlanStatus::Completed);
    }

    #[test]
    fn test_low_efficiency_consumes_more() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, Some(0.8));
        env.ledger.credit("STEEL", 5.0).unwrap();

        env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        let done = env
            .api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: Some(1.0) })
            .unwrap();
        assert!((done.materials_consumed[0].quantity - 2.5).abs() < 1e-9);
        let (on_hand, reserved) = stock(&env, "STEEL");
        assert!((on_hand - 2.5).abs() < 1e-9);
        assert_eq!(reserved, 0.0);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();

        // ASSIGNED 不能直接完工
        let err = env
            .api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: None })
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        // STARTED → PENDING
        let err = env.api.transition(a.assignment_id, AssignmentEvent::Unassign).unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        env.api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: None })
            .unwrap();
        // COMPLETED → STARTED
        let err = env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert_eq!(
            env.api.get_assignment(a.assignment_id).unwrap().status,
            AssignmentStatus::Completed
        );
    }

    #[test]
    fn test_cancel_started_releases_reservation() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();

        let started = env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        let reservation_id = started.materials_reserved[0].reservation_id.clone();

        let cancelled = env
            .api
            .transition(
                a.assignment_id,
                AssignmentEvent::Cancel {
                    reason: Some("设备故障".to_string()),
                },
            )
            .unwrap();
        assert_eq!(cancelled.status, AssignmentStatus::Cancelled);
        assert_eq!(cancelled.sequence_number, None);
        assert_eq!(stock(&env, "STEEL"), (5.0, 0.0));
        assert_eq!(
            env.ledger.reservation_status(&reservation_id).unwrap(),
            Some(MaterialReservationStatus::Released)
        );
        // 只有取消没有完工, 计划保持执行中
        assert_eq!(env.api.get_plan(a.plan_id).unwrap().status, PlanStatus::Active);
    }

    #[test]
    fn test_worker_cannot_start_two_assignments() {
        let env = setup_env(monday_at(8, 0));
        env.relations.link_worker_to_station(7, 10).unwrap();
        let plan = env.api.create_plan(new_plan("双节点", None)).unwrap();
        env.api
            .add_node(plan.plan_id, NewPlanNode::new(1, "A", 30.0).with_station(10, 1))
            .unwrap();
        env.api
            .add_node(plan.plan_id, NewPlanNode::new(2, "B", 30.0).with_station(10, 1))
            .unwrap();
        env.api.release_plan(plan.plan_id).unwrap();
        let launched = env.api.launch_plan(plan.plan_id).unwrap();

        env.api.transition(launched[0].assignment_id, AssignmentEvent::Start).unwrap();
        let err = env
            .api
            .transition(launched[1].assignment_id, AssignmentEvent::Start)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
    }

    #[test]
    fn test_unassign_and_reassign_moves_queue() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        assert_eq!(env.api.worker_queue(7).unwrap().len(), 1);

        let pending = env.api.transition(a.assignment_id, AssignmentEvent::Unassign).unwrap();
        assert_eq!(pending.status, AssignmentStatus::Pending);

        let reassigned = env
            .api
            .transition(
                a.assignment_id,
                AssignmentEvent::Assign {
                    worker_id: Some(9),
                    station_id: None,
                },
            )
            .unwrap();
        assert_eq!(reassigned.worker_id, Some(9));
        assert_eq!(reassigned.sequence_number, Some(1));
        assert!(env.api.worker_queue(7).unwrap().is_empty());
    }

    #[test]
    fn test_manual_node_stays_pending_until_assigned() {
        let env = setup_env(monday_at(8, 0));
        let plan = env.api.create_plan(new_plan("手动派工", None)).unwrap();
        env.api
            .add_node(
                plan.plan_id,
                NewPlanNode::new(1, "手工", 30.0).with_station(10, 1).with_manual_worker(3),
            )
            .unwrap();
        env.api.release_plan(plan.plan_id).unwrap();

        let launched = env.api.launch_plan(plan.plan_id).unwrap();
        assert_eq!(launched[0].status, AssignmentStatus::Pending);
        assert_eq!(launched[0].worker_id, Some(3));

        let assigned = env
            .api
            .transition(
                launched[0].assignment_id,
                AssignmentEvent::Assign {
                    worker_id: None,
                    station_id: None,
                },
            )
            .unwrap();
        assert_eq!(assigned.status, AssignmentStatus::Assigned);
        assert_eq!(assigned.worker_id, Some(3));
    }

    /// 指定目标状态的工单行写入失败
    fn block_status_write(env: &TestEnv, status: &str) {
        exec_sql(
            env,
            &format!(
                "CREATE TRIGGER block_status_write BEFORE UPDATE ON worker_assignment
                 WHEN NEW.status = '{}'
                 BEGIN SELECT RAISE(ABORT, 'status write blocked'); END;",
                status
            ),
        );
    }

    fn unblock_status_write(env: &TestEnv) {
        exec_sql(env, "DROP TRIGGER block_status_write;");
    }

    #[test]
    fn test_failed_cancel_write_keeps_reservation() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();
        let started = env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        let reservation_id = started.materials_reserved[0].reservation_id.clone();

        block_status_write(&env, "CANCELLED");
        let result = env.api.transition(
            a.assignment_id,
            AssignmentEvent::Cancel { reason: Some("停机".to_string()) },
        );
        assert!(result.is_err());

        // 工单与台账一并回滚
        let after = env.api.get_assignment(a.assignment_id).unwrap();
        assert_eq!(after.status, AssignmentStatus::Started);
        assert_eq!(after.material_reservation_status, MaterialReservationStatus::Reserved);
        assert_eq!(
            env.ledger.reservation_status(&reservation_id).unwrap(),
            Some(MaterialReservationStatus::Reserved)
        );
        assert_eq!(env.ledger.count_entries("STEEL", "RELEASE").unwrap(), 0);
        assert_eq!(stock(&env, "STEEL"), (5.0, 2.0));

        // 预留仍可正常完工
        unblock_status_write(&env);
        let done = env
            .api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: None })
            .unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert_eq!(stock(&env, "STEEL"), (3.0, 0.0));
    }

    #[test]
    fn test_failed_complete_write_consumes_nothing() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();
        env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();

        block_status_write(&env, "COMPLETED");
        assert!(env
            .api
            .transition(a.assignment_id, AssignmentEvent::Complete { actual_output: None })
            .is_err());

        assert_eq!(
            env.api.get_assignment(a.assignment_id).unwrap().status,
            AssignmentStatus::Started
        );
        assert_eq!(stock(&env, "STEEL"), (5.0, 2.0));
        assert_eq!(env.ledger.count_entries("STEEL", "CONSUME").unwrap(), 0);
        assert!(env.ledger.stock_of("PART").unwrap().is_none());

        unblock_status_write(&env);
        let cancelled = env
            .api
            .transition(a.assignment_id, AssignmentEvent::Cancel { reason: None })
            .unwrap();
        assert_eq!(cancelled.material_reservation_status, MaterialReservationStatus::Released);
        assert_eq!(stock(&env, "STEEL"), (5.0, 0.0));
    }

    #[test]
    fn test_queue_refresh_failure_after_commit_still_succeeds() {
        let env = setup_env(monday_at(8, 0));
        let a = launch_single(&env, None);
        env.ledger.credit("STEEL", 5.0).unwrap();

        // 状态不变的更新只来自队列重排
        exec_sql(
            &env,
            "CREATE TRIGGER block_queue_refresh BEFORE UPDATE ON worker_assignment
             WHEN NEW.status = OLD.status
             BEGIN SELECT RAISE(ABORT, 'queue refresh blocked'); END;",
        );

        let started = env.api.transition(a.assignment_id, AssignmentEvent::Start).unwrap();
        assert_eq!(started.status, AssignmentStatus::Started);
        assert_eq!(
            env.api.get_assignment(a.assignment_id).unwrap().status,
            AssignmentStatus::Started
        );
        assert_eq!(stock(&env, "STEEL"), (5.0, 2.0));
    }

    #[test]
    fn test_launch_survives_queue_refresh_failure() {
        let env = setup_env(monday_at(8, 0));
        exec_sql(
            &env,
            "CREATE TRIGGER block_queue_refresh BEFORE UPDATE ON worker_assignment
             WHEN NEW.status = OLD.status
             BEGIN SELECT RAISE(ABORT, 'queue refresh blocked'); END;",
        );

        let a = launch_single(&env, None);
        assert_eq!(a.status, AssignmentStatus::Assigned);
        // 序号未写回, 待下一次重排修正
        assert_eq!(a.sequence_number, None);
        assert_eq!(env.api.get_plan(a.plan_id).unwrap().status, PlanStatus::Active);
    }
}
