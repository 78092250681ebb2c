// ==========================================
// 车间生产执行调度系统 - 计划图校验与拓扑排序
// ==========================================
// 职责: 节点集合的结构校验（DAG）、确定性拓扑序
// 红线: 纯函数, 无副作用
// ==========================================

use crate::domain::plan::PlanNode;
use crate::engine::error::{EngineError, EngineResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

/// 校验结果
pub type ValidationResult = Result<(), Vec<PlanValidationError>>;

/// 校验错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// 节点ID重复
    DuplicateId,
    /// 标准工时 <= 0 或非有限值
    NonPositiveNominalTime,
    /// 效率不在 (0, 1]
    InvalidEfficiency,
    /// 拆分单元数为 0
    InvalidUnitCount,
    /// 前置节点不在本计划内
    UnknownPredecessor,
    /// 前置关系成环
    CyclicDependency,
    /// 标记为前序产出的物料没有任何上游节点产出
    UnresolvedDerivedInput,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::DuplicateId => "DUPLICATE_ID",
            ValidationErrorKind::NonPositiveNominalTime => "NON_POSITIVE_NOMINAL_TIME",
            ValidationErrorKind::InvalidEfficiency => "INVALID_EFFICIENCY",
            ValidationErrorKind::InvalidUnitCount => "INVALID_UNIT_COUNT",
            ValidationErrorKind::UnknownPredecessor => "UNKNOWN_PREDECESSOR",
            ValidationErrorKind::CyclicDependency => "CYCLIC_DEPENDENCY",
            ValidationErrorKind::UnresolvedDerivedInput => "UNRESOLVED_DERIVED_INPUT",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条校验错误
#[derive(Debug, Clone, PartialEq)]
pub struct PlanValidationError {
    pub kind: ValidationErrorKind,
    pub node_id: Option<i64>,
    /// 成环路径（首尾相同）, 仅 CyclicDependency 时非空
    pub cycle: Vec<i64>,
    pub message: String,
}

impl PlanValidationError {
    fn new(kind: ValidationErrorKind, node_id: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id,
            cycle: Vec::new(),
            message: message.into(),
        }
    }
}

/// 校验计划节点集合
///
/// 检查项:
/// 1. 节点ID唯一
/// 2. 标准工时为有限正数, 效率覆盖值在 (0, 1], unit_count >= 1
/// 3. 前置节点均在本计划内
/// 4. 前置关系无环（DFS, 报告环路径）
/// 5. 前序产出物料可由某个上游节点提供
///
/// 返回全部发现的问题, 而非遇到第一个即停止
pub fn validate(nodes: &[PlanNode]) -> ValidationResult {
    let mut errors = Vec::new();

    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.node_id) {
            errors.push(PlanValidationError::new(
                ValidationErrorKind::DuplicateId,
                Some(node.node_id),
                format!("节点ID重复: {}", node.node_id),
            ));
        }
        if !(node.nominal_time_min > 0.0 && node.nominal_time_min.is_finite()) {
            errors.push(PlanValidationError::new(
                ValidationErrorKind::NonPositiveNominalTime,
                Some(node.node_id),
                format!("节点 {} 标准工时必须为有限正数, 实际 {}", node.node_id, node.nominal_time_min),
            ));
        }
        if let Some(e) = node.efficiency {
            if !is_valid_efficiency(e) {
                errors.push(PlanValidationError::new(
                    ValidationErrorKind::InvalidEfficiency,
                    Some(node.node_id),
                    format!("节点 {} 效率必须在 (0, 1] 内, 实际 {}", node.node_id, e),
                ));
            }
        }
        if node.unit_count == 0 {
            errors.push(PlanValidationError::new(
                ValidationErrorKind::InvalidUnitCount,
                Some(node.node_id),
                format!("节点 {} 拆分单元数必须 >= 1", node.node_id),
            ));
        }
    }

    for node in nodes {
        for pred in &node.predecessors {
            if !ids.contains(pred) {
                errors.push(PlanValidationError::new(
                    ValidationErrorKind::UnknownPredecessor,
                    Some(node.node_id),
                    format!("节点 {} 的前置节点 {} 不在本计划内", node.node_id, pred),
                ));
            }
        }
    }

    match find_cycle(nodes) {
        Some(cycle) => {
            let mut err = PlanValidationError::new(
                ValidationErrorKind::CyclicDependency,
                cycle.first().copied(),
                format!("前置关系成环: {}", format_path(&cycle)),
            );
            err.cycle = cycle;
            errors.push(err);
        }
        // 有环时上游集合无意义, 仅在无环时检查前序物料
        None => errors.extend(check_derived_inputs(nodes)),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// 效率取值范围 (0, 1]
pub fn is_valid_efficiency(e: f64) -> bool {
    e > 0.0 && e <= 1.0
}

/// 确定性拓扑序
///
/// Kahn 算法, 就绪节点按 (sequence_order, node_id) 最小优先出队
pub fn topological_order(nodes: &[PlanNode]) -> EngineResult<Vec<i64>> {
    let ids: HashSet<i64> = nodes.iter().map(|n| n.node_id).collect();
    let rank: HashMap<i64, (i32, i64)> = nodes
        .iter()
        .map(|n| (n.node_id, (n.sequence_order, n.node_id)))
        .collect();

    let mut indegree: HashMap<i64, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut successors: HashMap<i64, Vec<i64>> = HashMap::new();
    for node in nodes {
        let preds: HashSet<i64> = node.predecessors.iter().copied().collect();
        for pred in preds {
            if !ids.contains(&pred) {
                continue;
            }
            successors.entry(pred).or_default().push(node.node_id);
            *indegree.entry(node.node_id).or_default() += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, i64)>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .filter_map(|(id, _)| rank.get(id).copied().map(Reverse))
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse((_, node_id))) = ready.pop() {
        order.push(node_id);
        if let Some(succs) = successors.get(&node_id) {
            for succ in succs {
                if let Some(d) = indegree.get_mut(succ) {
                    *d -= 1;
                    if *d == 0 {
                        if let Some(r) = rank.get(succ) {
                            ready.push(Reverse(*r));
                        }
                    }
                }
            }
        }
    }

    if order.len() < ids.len() {
        let cycle = find_cycle(nodes).unwrap_or_default();
        return Err(EngineError::CyclicDependency { cycle });
    }
    Ok(order)
}

/// 节点的全部传递前置（不含自身）
pub fn transitive_predecessors(nodes: &[PlanNode], node_id: i64) -> HashSet<i64> {
    let by_id: HashMap<i64, &PlanNode> = nodes.iter().map(|n| (n.node_id, n)).collect();
    let mut seen = HashSet::new();
    let mut stack: Vec<i64> = by_id
        .get(&node_id)
        .map(|n| n.predecessors.clone())
        .unwrap_or_default();
    while let Some(id) = stack.pop() {
        if id == node_id || !seen.insert(id) {
            continue;
        }
        if let Some(n) = by_id.get(&id) {
            stack.extend(n.predecessors.iter().copied());
        }
    }
    seen
}

// ==========================================
// 环检测（DFS 三色标记）
// ==========================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

/// 查找一个环, 返回路径 [a, b, ..., a]（沿前置方向）
fn find_cycle(nodes: &[PlanNode]) -> Option<Vec<i64>> {
    let mut sorted: Vec<&PlanNode> = nodes.iter().collect();
    sorted.sort_by_key(|n| n.node_id);

    let preds: HashMap<i64, Vec<i64>> = sorted
        .iter()
        .map(|n| {
            let mut p = n.predecessors.clone();
            p.sort_unstable();
            (n.node_id, p)
        })
        .collect();

    let mut marks: HashMap<i64, Mark> = sorted.iter().map(|n| (n.node_id, Mark::Unvisited)).collect();
    let mut path = Vec::new();

    for node in &sorted {
        if marks.get(&node.node_id) == Some(&Mark::Unvisited) {
            if let Some(cycle) = dfs(node.node_id, &preds, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs(
    node_id: i64,
    preds: &HashMap<i64, Vec<i64>>,
    marks: &mut HashMap<i64, Mark>,
    path: &mut Vec<i64>,
) -> Option<Vec<i64>> {
    marks.insert(node_id, Mark::InStack);
    path.push(node_id);

    for next in preds.get(&node_id).map(Vec::as_slice).unwrap_or_default() {
        match marks.get(next).copied() {
            Some(Mark::InStack) => {
                let start = path.iter().position(|id| id == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(*next);
                return Some(cycle);
            }
            Some(Mark::Unvisited) => {
                if let Some(cycle) = dfs(*next, preds, marks, path) {
                    return Some(cycle);
                }
            }
            // 已完成或不在本计划内
            _ => {}
        }
    }

    path.pop();
    marks.insert(node_id, Mark::Done);
    None
}

fn check_derived_inputs(nodes: &[PlanNode]) -> Vec<PlanValidationError> {
    let outputs: HashMap<i64, &str> = nodes
        .iter()
        .filter_map(|n| n.output_material_code.as_deref().map(|c| (n.node_id, c)))
        .collect();

    let mut errors = Vec::new();
    for node in nodes {
        let derived: Vec<&str> = node
            .material_inputs
            .iter()
            .filter(|m| m.from_prior_node)
            .map(|m| m.material_code.as_str())
            .collect();
        if derived.is_empty() {
            continue;
        }
        let upstream = transitive_predecessors(nodes, node.node_id);
        for code in derived {
            let produced = upstream
                .iter()
                .any(|id| outputs.get(id).is_some_and(|c| *c == code));
            if !produced {
                errors.push(PlanValidationError::new(
                    ValidationErrorKind::UnresolvedDerivedInput,
                    Some(node.node_id),
                    format!("节点 {} 的前序物料 {} 没有上游节点产出", node.node_id, code),
                ));
            }
        }
    }
    errors
}

fn format_path(path: &[i64]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
