// ==========================================
// 学习成果达成度引擎 - 成果图构建器
// ==========================================
// 职责: 把扁平行装配为按课程划分的成果图 (arena + 索引)
// 输入: OutcomeDataset (某一计算范围)
// 输出: Vec<CourseOutcomeGraph>,按课程自然键排序
// ==========================================
// 约束:
// - 只有 is_included_in_clo = true 的作业参与
// - 边按目标节点去重: 同一 CLO 经两个 sub-PLO 到达同一 PLO 只算一条边
// - 节点插入顺序即拓扑顺序: 作业 → CLO → PO/PLO/SO
// ==========================================

use crate::domain::course::CourseInfo;
use crate::domain::dataset::OutcomeDataset;
use crate::domain::types::OutcomeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// 图内稳定节点编号 (arena 下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// 节点业务键 {kind, id}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: OutcomeKind,
    pub id: i64,
}

impl NodeKey {
    pub fn new(kind: OutcomeKind, id: i64) -> Self {
        Self { kind, id }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeNode {
    pub key: NodeKey,
    pub code: String,
    /// 判定阈值 (%)
    pub threshold: f64,
    /// 作业节点的满分;其他节点为 None
    pub max_score: Option<f64>,
}

/// 参与计算的学生 (仅 ENROLL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    pub student_id: i64,
    pub student_code: String,
}

// ==========================================
// CourseOutcomeGraph - 单门课程的成果图
// ==========================================
#[derive(Debug, Clone)]
pub struct CourseOutcomeGraph {
    pub course: CourseInfo,
    nodes: Vec<OutcomeNode>,
    index: HashMap<NodeKey, NodeId>,
    /// 子 → 父
    upward: Vec<Vec<NodeId>>,
    /// 父 → 子
    downward: Vec<Vec<NodeId>>,
    students: Vec<StudentRef>,
    /// (student_id, assignment_id) → 原始得分
    scores: HashMap<(i64, i64), f64>,
}

impl CourseOutcomeGraph {
    pub fn nodes(&self) -> &[OutcomeNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &OutcomeNode {
        &self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn lookup(&self, key: NodeKey) -> Option<NodeId> {
        self.index.get(&key).copied()
    }

    /// 节点编号按拓扑顺序 (自底向上) 迭代
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn nodes_of_kind(&self, kind: OutcomeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(move |id| self.node(*id).key.kind == kind)
    }

    /// 上行边 (已去重、升序)
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.upward[id.index()]
    }

    /// 下行边 (已去重、升序)
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.downward[id.index()]
    }

    pub fn edge_count(&self) -> usize {
        self.upward.iter().map(|edges| edges.len()).sum()
    }

    pub fn students(&self) -> &[StudentRef] {
        &self.students
    }

    pub fn score(&self, student_id: i64, assignment_id: i64) -> Option<f64> {
        self.scores.get(&(student_id, assignment_id)).copied()
    }

    /// 无 CLO 的课程视为空图 (上层报告为"不适用")
    pub fn is_empty(&self) -> bool {
        self.nodes_of_kind(OutcomeKind::Clo).next().is_none()
    }
}

// ==========================================
// OutcomeGraphBuilder
// ==========================================
/// 成果图构建器 (无状态)
#[derive(Debug, Default, Clone, Copy)]
pub struct OutcomeGraphBuilder;

impl OutcomeGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// 为数据集中的每门课程构建成果图,按 (课程代码, 学年, 学期) 排序
    pub fn build(&self, dataset: &OutcomeDataset) -> Vec<CourseOutcomeGraph> {
        let mut courses: Vec<&CourseInfo> = dataset.courses.iter().collect();
        courses.sort_by(|a, b| a.natural_key().cmp(&b.natural_key()));

        let graphs: Vec<CourseOutcomeGraph> = courses
            .into_iter()
            .map(|course| self.build_course(course, dataset))
            .collect();

        tracing::debug!(
            courses = graphs.len(),
            nodes = graphs.iter().map(|g| g.node_count()).sum::<usize>(),
            "成果图构建完成"
        );

        graphs
    }

    /// 构建单门课程的成果图
    pub fn build_course(&self, course: &CourseInfo, dataset: &OutcomeDataset) -> CourseOutcomeGraph {
        let mut arena = GraphArena::default();
        let course_id = course.course_id;

        // 1. 作业节点 (只保留计入 CLO 的作业)
        let mut assignments: Vec<_> = dataset
            .assignments
            .iter()
            .filter(|a| a.course_id == course_id && a.is_included_in_clo)
            .collect();
        assignments.sort_by_key(|a| a.assignment_id);
        for a in &assignments {
            arena.insert(OutcomeNode {
                key: NodeKey::new(OutcomeKind::Assignment, a.assignment_id),
                code: a.name.clone(),
                threshold: a.expected_score_percentage,
                max_score: Some(a.max_score),
            });
        }

        // 2. CLO 节点
        let mut clos: Vec<_> = dataset
            .clos
            .iter()
            .filter(|c| c.course_id == course_id)
            .collect();
        clos.sort_by(|a, b| a.code.cmp(&b.code).then(a.clo_id.cmp(&b.clo_id)));
        for c in &clos {
            arena.insert(OutcomeNode {
                key: NodeKey::new(OutcomeKind::Clo, c.clo_id),
                code: c.code.clone(),
                threshold: c.expected_passing_assignment_percentage,
                max_score: None,
            });
        }

        // 3. PO/PLO/SO 节点: 按 (kind, code, id) 排序后插入
        let clo_ids: HashSet<i64> = clos.iter().map(|c| c.clo_id).collect();
        let mut outcomes: BTreeSet<(OutcomeKind, String, i64)> = BTreeSet::new();
        for link in dataset
            .clo_outcome_links
            .iter()
            .filter(|l| clo_ids.contains(&l.clo_id) && l.kind.is_program_level())
        {
            outcomes.insert((link.kind, link.outcome_code.clone(), link.outcome_id));
        }
        for (kind, code, id) in outcomes {
            arena.insert(OutcomeNode {
                key: NodeKey::new(kind, id),
                code,
                threshold: course.expected_passing_clo_percentage,
                max_score: None,
            });
        }

        // 4. 边: 以集合语义收集,天然按目标节点去重
        let mut edges: BTreeSet<(NodeId, NodeId)> = BTreeSet::new();
        for link in &dataset.assignment_clo_links {
            let child = arena.lookup(NodeKey::new(OutcomeKind::Assignment, link.assignment_id));
            let parent = arena.lookup(NodeKey::new(OutcomeKind::Clo, link.clo_id));
            if let (Some(child), Some(parent)) = (child, parent) {
                edges.insert((child, parent));
            }
        }
        for link in &dataset.clo_outcome_links {
            if !link.kind.is_program_level() {
                continue;
            }
            let child = arena.lookup(NodeKey::new(OutcomeKind::Clo, link.clo_id));
            let parent = arena.lookup(NodeKey::new(link.kind, link.outcome_id));
            if let (Some(child), Some(parent)) = (child, parent) {
                edges.insert((child, parent));
            }
        }
        for (child, parent) in edges {
            arena.connect(child, parent);
        }

        // 5. 学生: 仅 ENROLL,退课学生从所有层级剔除
        let students: Vec<StudentRef> = dataset
            .enrolled_students(course_id)
            .into_iter()
            .map(|(student_id, student_code)| StudentRef {
                student_id,
                student_code,
            })
            .collect();

        // 6. 得分: 只保留本课程作业 + 在读学生
        let student_ids: HashSet<i64> = students.iter().map(|s| s.student_id).collect();
        let assignment_ids: HashSet<i64> = assignments.iter().map(|a| a.assignment_id).collect();
        let scores: HashMap<(i64, i64), f64> = dataset
            .scores
            .iter()
            .filter(|s| student_ids.contains(&s.student_id) && assignment_ids.contains(&s.assignment_id))
            .map(|s| ((s.student_id, s.assignment_id), s.score))
            .collect();

        arena.finish(course.clone(), students, scores)
    }
}

#[derive(Default)]
struct GraphArena {
    nodes: Vec<OutcomeNode>,
    index: HashMap<NodeKey, NodeId>,
    upward: Vec<Vec<NodeId>>,
    downward: Vec<Vec<NodeId>>,
}

impl GraphArena {
    fn insert(&mut self, node: OutcomeNode) -> NodeId {
        if let Some(existing) = self.index.get(&node.key) {
            return *existing;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.index.insert(node.key, id);
        self.nodes.push(node);
        self.upward.push(Vec::new());
        self.downward.push(Vec::new());
        id
    }

    fn lookup(&self, key: NodeKey) -> Option<NodeId> {
        self.index.get(&key).copied()
    }

    /// 调用方保证 (child, parent) 不重复且按升序给出
    fn connect(&mut self, child: NodeId, parent: NodeId) {
        self.upward[child.index()].push(parent);
        self.downward[parent.index()].push(child);
    }

    fn finish(
        mut self,
        course: CourseInfo,
        students: Vec<StudentRef>,
        scores: HashMap<(i64, i64), f64>,
    ) -> CourseOutcomeGraph {
        for edges in self.downward.iter_mut() {
            edges.sort();
        }
        CourseOutcomeGraph {
            course,
            nodes: self.nodes,
            index: self.index,
            upward: self.upward,
            downward: self.downward,
            students,
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::course::CriteriaGrade;
    use crate::domain::dataset::*;
    use crate::domain::types::EnrollmentStatus;

    fn course(id: i64, code: &str, year: i32, semester: i32) -> CourseInfo {
        CourseInfo {
            course_id: id,
            programme_id: 1,
            code: code.to_string(),
            name: format!("课程{}", code),
            year,
            semester,
            expected_passing_clo_percentage: 50.0,
            criteria_grade: CriteriaGrade::default(),
        }
    }

    fn assignment(id: i64, course_id: i64, included: bool) -> AssignmentRow {
        AssignmentRow {
            assignment_id: id,
            course_id,
            group_id: 1,
            group_weight: 100.0,
            name: format!("HW{}", id),
            max_score: 10.0,
            expected_score_percentage: 60.0,
            is_included_in_clo: included,
        }
    }

    fn plo_link(clo_id: i64, plo_id: i64, sub_id: i64) -> CloOutcomeLinkRow {
        CloOutcomeLinkRow {
            clo_id,
            kind: OutcomeKind::Plo,
            outcome_id: plo_id,
            outcome_code: format!("PLO{}", plo_id),
            via_sub_id: Some(sub_id),
        }
    }

    fn dataset() -> OutcomeDataset {
        OutcomeDataset {
            courses: vec![course(1, "CS101", 2024, 1)],
            enrollments: vec![
                EnrollmentRow {
                    course_id: 1,
                    student_id: 20,
                    student_code: "S20".to_string(),
                    status: EnrollmentStatus::Enroll,
                },
                EnrollmentRow {
                    course_id: 1,
                    student_id: 10,
                    student_code: "S10".to_string(),
                    status: EnrollmentStatus::Enroll,
                },
                EnrollmentRow {
                    course_id: 1,
                    student_id: 30,
                    student_code: "S30".to_string(),
                    status: EnrollmentStatus::Withdraw,
                },
            ],
            assignments: vec![assignment(1, 1, true), assignment(2, 1, true), assignment(3, 1, false)],
            clos: vec![CloRow {
                clo_id: 100,
                course_id: 1,
                code: "CLO1".to_string(),
                expected_passing_assignment_percentage: 50.0,
            }],
            assignment_clo_links: vec![
                AssignmentCloLinkRow { assignment_id: 1, clo_id: 100 },
                AssignmentCloLinkRow { assignment_id: 2, clo_id: 100 },
                AssignmentCloLinkRow { assignment_id: 3, clo_id: 100 },
                // 重复行
                AssignmentCloLinkRow { assignment_id: 1, clo_id: 100 },
            ],
            clo_outcome_links: vec![plo_link(100, 7, 71), plo_link(100, 7, 72)],
            scores: vec![
                ScoreRow { student_id: 10, assignment_id: 1, score: 8.0 },
                ScoreRow { student_id: 30, assignment_id: 1, score: 9.0 },
            ],
        }
    }

    #[test]
    fn test_clo_via_two_sub_plos_yields_single_edge() {
        let graphs = OutcomeGraphBuilder::new().build(&dataset());
        let graph = &graphs[0];

        let clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 100)).unwrap();
        let plo = graph.lookup(NodeKey::new(OutcomeKind::Plo, 7)).unwrap();
        assert_eq!(graph.parents(clo), &[plo]);
        assert_eq!(graph.children(plo), &[clo]);
    }

    #[test]
    fn test_excluded_assignment_does_not_participate() {
        let graphs = OutcomeGraphBuilder::new().build(&dataset());
        let graph = &graphs[0];

        assert!(graph.lookup(NodeKey::new(OutcomeKind::Assignment, 3)).is_none());
        let clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 100)).unwrap();
        assert_eq!(graph.children(clo).len(), 2);
        // 2 条作业→CLO 边 + 1 条 CLO→PLO 边
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_students_sorted_and_withdrawn_removed() {
        let graphs = OutcomeGraphBuilder::new().build(&dataset());
        let ids: Vec<i64> = graphs[0].students().iter().map(|s| s.student_id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(graphs[0].score(30, 1), None);
        assert_eq!(graphs[0].score(10, 1), Some(8.0));
    }

    #[test]
    fn test_topological_node_order() {
        let graphs = OutcomeGraphBuilder::new().build(&dataset());
        let kinds: Vec<OutcomeKind> = graphs[0].nodes().iter().map(|n| n.key.kind).collect();
        assert_eq!(
            kinds,
            vec![OutcomeKind::Assignment, OutcomeKind::Assignment, OutcomeKind::Clo, OutcomeKind::Plo]
        );
    }

    #[test]
    fn test_course_without_clo_is_empty_graph() {
        let mut ds = dataset();
        ds.clos.clear();
        let graphs = OutcomeGraphBuilder::new().build(&ds);
        assert_eq!(graphs.len(), 1);
        assert!(graphs[0].is_empty());
    }

    #[test]
    fn test_courses_sorted_by_natural_key() {
        let mut ds = dataset();
        ds.courses = vec![
            course(3, "CS200", 2023, 2),
            course(2, "CS101", 2024, 2),
            course(1, "CS101", 2024, 1),
        ];
        let graphs = OutcomeGraphBuilder::new().build(&ds);
        let ids: Vec<i64> = graphs.iter().map(|g| g.course.course_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
