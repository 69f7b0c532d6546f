// ==========================================
// 学习成果达成度引擎 - 群体汇总引擎
// ==========================================
// 职责: 把判定矩阵汇总为各成果的通过率
// 公式: passing_percentage = 通过人数 / (通过 + 未通过) * 100
//       不适用的学生同时从分子分母剔除;无人适用时为 None
// 范围: 单门课程 / 单个学生全部课程 / 专业 + 学年区间
// ==========================================
// 输出顺序稳定: 课程按 (代码, 学年, 学期),成果按 (类型, 代码, id)
// ==========================================

use crate::domain::course::CourseInfo;
use crate::domain::types::{OutcomeKind, Verdict};
use crate::engine::outcome_graph::{CourseOutcomeGraph, NodeId};
use crate::engine::threshold_evaluator::EvaluationMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// 输出结构
// ==========================================

/// 课程引用 (报表中的课程自然键)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub course_id: i64,
    pub code: String,
    pub name: String,
    pub year: i32,
    pub semester: i32,
}

impl From<&CourseInfo> for CourseRef {
    fn from(course: &CourseInfo) -> Self {
        Self {
            course_id: course.course_id,
            code: course.code.clone(),
            name: course.name.clone(),
            year: course.year,
            semester: course.semester,
        }
    }
}

/// 单个成果节点的群体达成情况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAttainment {
    pub kind: OutcomeKind,
    pub outcome_id: i64,
    pub code: String,
    pub threshold: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub not_applicable_count: usize,
    /// None = 不适用 (没有任何学生可判定)
    pub passing_percentage: Option<f64>,
}

/// 单个学生在某节点上的判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVerdict {
    pub kind: OutcomeKind,
    pub outcome_id: i64,
    pub code: String,
    pub verdict: Verdict,
}

/// 学生通过矩阵中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttainmentRow {
    pub student_id: i64,
    pub student_code: String,
    pub verdicts: Vec<NodeVerdict>,
}

/// 单门课程的达成度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAttainment {
    pub course: CourseRef,
    /// 课程没有 CLO 时为 false
    pub applicable: bool,
    pub outcomes: Vec<OutcomeAttainment>,
}

/// 专业报表中的一门课程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammeCourseRates {
    pub course: CourseRef,
    /// 仅 PO / PLO / SO
    pub outcomes: Vec<OutcomeAttainment>,
}

/// 学生历史中某成果的贡献课程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingCourse {
    pub course: CourseRef,
    pub verdict: Verdict,
}

/// 学生在某个专业级成果上的历史达成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentOutcomeHistoryItem {
    pub kind: OutcomeKind,
    pub outcome_id: i64,
    pub code: String,
    pub passed_courses: usize,
    pub failed_courses: usize,
    pub attainment_percentage: Option<f64>,
    pub contributing_courses: Vec<ContributingCourse>,
}

// ==========================================
// PopulationAggregator
// ==========================================
/// 群体汇总引擎 (无状态)
#[derive(Debug, Default, Clone, Copy)]
pub struct PopulationAggregator;

impl PopulationAggregator {
    pub fn new() -> Self {
        Self
    }

    /// 通过率;分母为 0 时返回 None
    pub fn passing_percentage(pass_count: usize, fail_count: usize) -> Option<f64> {
        let denominator = pass_count + fail_count;
        if denominator == 0 {
            None
        } else {
            Some(pass_count as f64 / denominator as f64 * 100.0)
        }
    }

    /// 汇总单个节点
    pub fn aggregate_node(
        &self,
        graph: &CourseOutcomeGraph,
        matrix: &EvaluationMatrix,
        node_id: NodeId,
    ) -> OutcomeAttainment {
        let node = graph.node(node_id);
        let (mut pass_count, mut fail_count, mut na_count) = (0usize, 0usize, 0usize);
        for verdict in matrix.node_verdicts(node_id) {
            match verdict {
                Verdict::Pass => pass_count += 1,
                Verdict::Fail => fail_count += 1,
                Verdict::NotApplicable => na_count += 1,
            }
        }

        OutcomeAttainment {
            kind: node.key.kind,
            outcome_id: node.key.id,
            code: node.code.clone(),
            threshold: node.threshold,
            pass_count,
            fail_count,
            not_applicable_count: na_count,
            passing_percentage: Self::passing_percentage(pass_count, fail_count),
        }
    }

    /// 单门课程: 全部 CLO / PO / PLO / SO
    pub fn per_course(&self, graph: &CourseOutcomeGraph, matrix: &EvaluationMatrix) -> CourseAttainment {
        let outcomes = graph
            .node_ids()
            .filter(|id| graph.node(*id).key.kind != OutcomeKind::Assignment)
            .map(|id| self.aggregate_node(graph, matrix, id))
            .collect();

        CourseAttainment {
            course: CourseRef::from(&graph.course),
            applicable: !graph.is_empty(),
            outcomes,
        }
    }

    /// 单门课程的学生通过矩阵 (CLO 及以上层级)
    pub fn per_student_matrix(
        &self,
        graph: &CourseOutcomeGraph,
        matrix: &EvaluationMatrix,
    ) -> Vec<StudentAttainmentRow> {
        let nodes: Vec<NodeId> = graph
            .node_ids()
            .filter(|id| graph.node(*id).key.kind != OutcomeKind::Assignment)
            .collect();

        graph
            .students()
            .iter()
            .enumerate()
            .map(|(s_idx, student)| StudentAttainmentRow {
                student_id: student.student_id,
                student_code: student.student_code.clone(),
                verdicts: nodes
                    .iter()
                    .map(|id| {
                        let node = graph.node(*id);
                        NodeVerdict {
                            kind: node.key.kind,
                            outcome_id: node.key.id,
                            code: node.code.clone(),
                            verdict: matrix.verdict(*id, s_idx),
                        }
                    })
                    .collect(),
            })
            .collect()
    }

    /// 专业 + 学年区间: 每门课程的 PO / PLO / SO 通过率
    ///
    /// graphs 须已按课程自然键排序 (OutcomeGraphBuilder 保证)。
    pub fn per_programme(
        &self,
        graphs: &[CourseOutcomeGraph],
        matrices: &[EvaluationMatrix],
    ) -> Vec<ProgrammeCourseRates> {
        graphs
            .iter()
            .zip(matrices.iter())
            .map(|(graph, matrix)| ProgrammeCourseRates {
                course: CourseRef::from(&graph.course),
                outcomes: graph
                    .node_ids()
                    .filter(|id| graph.node(*id).key.kind.is_program_level())
                    .map(|id| self.aggregate_node(graph, matrix, id))
                    .collect(),
            })
            .collect()
    }

    /// 单个学生: 各专业级成果跨课程的历史达成
    pub fn per_student_history(
        &self,
        student_id: i64,
        graphs: &[CourseOutcomeGraph],
        matrices: &[EvaluationMatrix],
    ) -> Vec<StudentOutcomeHistoryItem> {
        let mut items: BTreeMap<(OutcomeKind, String, i64), StudentOutcomeHistoryItem> = BTreeMap::new();

        for (graph, matrix) in graphs.iter().zip(matrices.iter()) {
            let s_idx = match matrix.student_index(student_id) {
                Some(idx) => idx,
                None => continue,
            };

            for node_id in graph.node_ids() {
                let node = graph.node(node_id);
                if !node.key.kind.is_program_level() {
                    continue;
                }
                let verdict = matrix.verdict(node_id, s_idx);
                let item = items
                    .entry((node.key.kind, node.code.clone(), node.key.id))
                    .or_insert_with(|| StudentOutcomeHistoryItem {
                        kind: node.key.kind,
                        outcome_id: node.key.id,
                        code: node.code.clone(),
                        passed_courses: 0,
                        failed_courses: 0,
                        attainment_percentage: None,
                        contributing_courses: Vec::new(),
                    });
                match verdict {
                    Verdict::Pass => item.passed_courses += 1,
                    Verdict::Fail => item.failed_courses += 1,
                    Verdict::NotApplicable => {}
                }
                item.contributing_courses.push(ContributingCourse {
                    course: CourseRef::from(&graph.course),
                    verdict,
                });
            }
        }

        items
            .into_values()
            .map(|mut item| {
                item.attainment_percentage =
                    Self::passing_percentage(item.passed_courses, item.failed_courses);
                item
            })
            .collect()
    }
}
