// ==========================================
// 学习成果达成度引擎 - 阈值判定引擎
// ==========================================
// 职责: 对每个 (学生, 节点) 自底向上给出 通过/未通过/不适用
// 输入: CourseOutcomeGraph
// 输出: EvaluationMatrix (节点 × 学生)
// ==========================================
// 规则:
// - 作业: score / max_score * 100 >= expected_score_percentage
//         无成绩 = 已作答且未通过;max_score <= 0 = 不适用
// - CLO:  通过作业数 / 关联作业数 * 100 >= CLO 阈值
// - PO/PLO/SO: 通过 CLO 数 / 关联 CLO 数 * 100 >= 课程 CLO 阈值
// - 子节点不适用时,从父节点的分子和分母中同时剔除;分母为 0 即不适用
// - 相等按通过处理 (>=)
// ==========================================

use crate::domain::types::{OutcomeKind, Verdict};
use crate::engine::context::EvalContext;
use crate::engine::error::EngineResult;
use crate::engine::outcome_graph::{CourseOutcomeGraph, NodeId};
use serde::{Deserialize, Serialize};

/// 百分比比较容差,避免 1/3*100 与 33.333.. 这类舍入翻转
const PERCENT_EPSILON: f64 = 1e-9;

/// 比率是否达到阈值 (相等视为达到)
pub fn meets_threshold(percentage: f64, threshold: f64) -> bool {
    percentage + PERCENT_EPSILON >= threshold
}

/// 作业判定
pub fn assignment_verdict(score: Option<f64>, max_score: f64, expected_percentage: f64) -> Verdict {
    if max_score <= 0.0 {
        return Verdict::NotApplicable;
    }
    let score = match score {
        Some(s) => s,
        None => return Verdict::Fail,
    };
    if meets_threshold(score / max_score * 100.0, expected_percentage) {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// 汇总判定: 子节点中通过数 / 适用数
pub fn rollup_verdict(passed: usize, applicable: usize, threshold: f64) -> Verdict {
    if applicable == 0 {
        return Verdict::NotApplicable;
    }
    let percentage = passed as f64 / applicable as f64 * 100.0;
    if meets_threshold(percentage, threshold) {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

// ==========================================
// EvaluationMatrix - 判定矩阵
// ==========================================
/// `{节点, 学生} → 判定` 统一结果表,供所有报表消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMatrix {
    node_count: usize,
    /// 与 graph.students() 同序
    student_ids: Vec<i64>,
    /// 节点优先存储: verdicts[node * students + student]
    verdicts: Vec<Verdict>,
}

impl EvaluationMatrix {
    pub fn student_count(&self) -> usize {
        self.student_ids.len()
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn student_ids(&self) -> &[i64] {
        &self.student_ids
    }

    pub fn student_index(&self, student_id: i64) -> Option<usize> {
        self.student_ids.binary_search(&student_id).ok()
    }

    pub fn verdict(&self, node: NodeId, student_index: usize) -> Verdict {
        self.verdicts[node.index() * self.student_ids.len() + student_index]
    }

    /// 某节点上所有学生的判定
    pub fn node_verdicts(&self, node: NodeId) -> &[Verdict] {
        let n = self.student_ids.len();
        let start = node.index() * n;
        &self.verdicts[start..start + n]
    }
}

// ==========================================
// ThresholdEvaluator
// ==========================================
/// 阈值判定引擎 (无状态,可并发用于不同范围)
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// 判定单门课程
    ///
    /// 学生按 student_id 升序处理,结果与输入顺序无关。
    pub fn evaluate(&self, graph: &CourseOutcomeGraph, ctx: &EvalContext) -> EngineResult<EvaluationMatrix> {
        ctx.check()?;

        let students = graph.students();
        let n = students.len();
        let node_count = graph.node_count();
        let mut verdicts = vec![Verdict::NotApplicable; node_count * n];

        for (s_idx, student) in students.iter().enumerate() {
            ctx.check()?;

            // 节点编号即拓扑顺序,子节点总在父节点之前完成
            for node_id in graph.node_ids() {
                let node = graph.node(node_id);
                let verdict = match node.key.kind {
                    OutcomeKind::Assignment => assignment_verdict(
                        graph.score(student.student_id, node.key.id),
                        node.max_score.unwrap_or(0.0),
                        node.threshold,
                    ),
                    _ => {
                        let mut passed = 0usize;
                        let mut applicable = 0usize;
                        for child in graph.children(node_id) {
                            match verdicts[child.index() * n + s_idx] {
                                Verdict::Pass => {
                                    passed += 1;
                                    applicable += 1;
                                }
                                Verdict::Fail => applicable += 1,
                                Verdict::NotApplicable => {}
                            }
                        }
                        rollup_verdict(passed, applicable, node.threshold)
                    }
                };
                verdicts[node_id.index() * n + s_idx] = verdict;
            }
        }

        tracing::debug!(
            course_id = graph.course.course_id,
            students = n,
            nodes = node_count,
            "阈值判定完成"
        );

        Ok(EvaluationMatrix {
            node_count,
            student_ids: students.iter().map(|s| s.student_id).collect(),
            verdicts,
        })
    }

    /// 判定多门课程,任一检查点失败即整体中止
    pub fn evaluate_all(
        &self,
        graphs: &[CourseOutcomeGraph],
        ctx: &EvalContext,
    ) -> EngineResult<Vec<EvaluationMatrix>> {
        graphs.iter().map(|g| self.evaluate(g, ctx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::course::{CourseInfo, CriteriaGrade};
    use crate::domain::dataset::*;
    use crate::domain::types::EnrollmentStatus;
    use crate::engine::error::EngineError;
    use crate::engine::outcome_graph::{NodeKey, OutcomeGraphBuilder};

    /// 1 门课程,2 名学生,1 个 CLO 关联 2 个作业 (期望 60%)
    /// X 两个作业都通过,Y 只通过一个
    fn scenario(clo_threshold: f64, y_status: EnrollmentStatus) -> OutcomeDataset {
        let assignment = |id: i64| AssignmentRow {
            assignment_id: id,
            course_id: 1,
            group_id: 1,
            group_weight: 100.0,
            name: format!("HW{}", id),
            max_score: 100.0,
            expected_score_percentage: 60.0,
            is_included_in_clo: true,
        };
        OutcomeDataset {
            courses: vec![CourseInfo {
                course_id: 1,
                programme_id: 1,
                code: "CS101".to_string(),
                name: "程序设计".to_string(),
                year: 2024,
                semester: 1,
                expected_passing_clo_percentage: 50.0,
                criteria_grade: CriteriaGrade::default(),
            }],
            enrollments: vec![
                EnrollmentRow {
                    course_id: 1,
                    student_id: 1,
                    student_code: "X".to_string(),
                    status: EnrollmentStatus::Enroll,
                },
                EnrollmentRow {
                    course_id: 1,
                    student_id: 2,
                    student_code: "Y".to_string(),
                    status: y_status,
                },
            ],
            assignments: vec![assignment(11), assignment(12)],
            clos: vec![CloRow {
                clo_id: 100,
                course_id: 1,
                code: "CLO1".to_string(),
                expected_passing_assignment_percentage: clo_threshold,
            }],
            assignment_clo_links: vec![
                AssignmentCloLinkRow { assignment_id: 11, clo_id: 100 },
                AssignmentCloLinkRow { assignment_id: 12, clo_id: 100 },
            ],
            clo_outcome_links: vec![CloOutcomeLinkRow {
                clo_id: 100,
                kind: OutcomeKind::Po,
                outcome_id: 500,
                outcome_code: "PO1".to_string(),
                via_sub_id: None,
            }],
            scores: vec![
                ScoreRow { student_id: 1, assignment_id: 11, score: 90.0 },
                ScoreRow { student_id: 1, assignment_id: 12, score: 60.0 },
                ScoreRow { student_id: 2, assignment_id: 11, score: 75.0 },
                ScoreRow { student_id: 2, assignment_id: 12, score: 30.0 },
            ],
        }
    }

    fn evaluate(ds: &OutcomeDataset) -> (CourseOutcomeGraph, EvaluationMatrix) {
        let graph = OutcomeGraphBuilder::new().build(ds).remove(0);
        let matrix = ThresholdEvaluator::new()
            .evaluate(&graph, &EvalContext::background())
            .unwrap();
        (graph, matrix)
    }

    #[test]
    fn test_assignment_boundary_equal_passes() {
        assert_eq!(assignment_verdict(Some(60.0), 100.0, 60.0), Verdict::Pass);
        assert_eq!(assignment_verdict(Some(59.99), 100.0, 60.0), Verdict::Fail);
        assert_eq!(assignment_verdict(Some(3.0), 5.0, 60.0), Verdict::Pass);
    }

    #[test]
    fn test_missing_score_is_fail_not_na() {
        assert_eq!(assignment_verdict(None, 100.0, 0.0), Verdict::Fail);
    }

    #[test]
    fn test_zero_max_score_is_not_applicable() {
        assert_eq!(assignment_verdict(Some(5.0), 0.0, 60.0), Verdict::NotApplicable);
    }

    #[test]
    fn test_rollup_zero_denominator_not_applicable() {
        assert_eq!(rollup_verdict(0, 0, 0.0), Verdict::NotApplicable);
        assert_eq!(rollup_verdict(1, 3, 100.0 / 3.0), Verdict::Pass);
    }

    #[test]
    fn test_scenario_a_both_students_pass_clo() {
        let (graph, matrix) = evaluate(&scenario(50.0, EnrollmentStatus::Enroll));
        let clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 100)).unwrap();
        assert_eq!(matrix.node_verdicts(clo), &[Verdict::Pass, Verdict::Pass]);
    }

    #[test]
    fn test_scenario_b_raised_threshold_fails_y() {
        let (graph, matrix) = evaluate(&scenario(60.0, EnrollmentStatus::Enroll));
        let clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 100)).unwrap();
        let y = matrix.student_index(2).unwrap();
        assert_eq!(matrix.verdict(clo, y), Verdict::Fail);

        // Y 的 CLO 未通过 → PO 层 0/1 < 50%
        let po = graph.lookup(NodeKey::new(OutcomeKind::Po, 500)).unwrap();
        assert_eq!(matrix.verdict(po, y), Verdict::Fail);
    }

    #[test]
    fn test_scenario_c_withdrawn_student_omitted() {
        let (_, matrix) = evaluate(&scenario(60.0, EnrollmentStatus::Withdraw));
        assert_eq!(matrix.student_ids(), &[1i64]);
    }

    #[test]
    fn test_clo_without_assignments_not_applicable_and_excluded_upward() {
        let mut ds = scenario(50.0, EnrollmentStatus::Enroll);
        ds.clos.push(CloRow {
            clo_id: 101,
            course_id: 1,
            code: "CLO2".to_string(),
            expected_passing_assignment_percentage: 50.0,
        });
        ds.clo_outcome_links.push(CloOutcomeLinkRow {
            clo_id: 101,
            kind: OutcomeKind::Po,
            outcome_id: 500,
            outcome_code: "PO1".to_string(),
            via_sub_id: None,
        });
        let (graph, matrix) = evaluate(&ds);

        let empty_clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 101)).unwrap();
        assert!(matrix.node_verdicts(empty_clo).iter().all(|v| *v == Verdict::NotApplicable));

        // PO: 仅 CLO1 计入分母,两人都通过
        let po = graph.lookup(NodeKey::new(OutcomeKind::Po, 500)).unwrap();
        assert_eq!(matrix.node_verdicts(po), &[Verdict::Pass, Verdict::Pass]);
    }

    #[test]
    fn test_result_independent_of_input_order() {
        let ds = scenario(50.0, EnrollmentStatus::Enroll);
        let mut reversed = ds.clone();
        reversed.enrollments.reverse();
        reversed.scores.reverse();
        reversed.assignment_clo_links.reverse();

        let (_, a) = evaluate(&ds);
        let (_, b) = evaluate(&reversed);
        assert_eq!(a, b);
    }

    #[test]
    fn test_raising_threshold_never_increases_pass_count() {
        let mut previous = usize::MAX;
        for threshold in [0.0, 25.0, 50.0, 50.0001, 75.0, 100.0] {
            let (graph, matrix) = evaluate(&scenario(threshold, EnrollmentStatus::Enroll));
            let clo = graph.lookup(NodeKey::new(OutcomeKind::Clo, 100)).unwrap();
            let passed = matrix.node_verdicts(clo).iter().filter(|v| v.is_pass()).count();
            assert!(passed <= previous, "threshold={} passed={}", threshold, passed);
            previous = passed;
        }
    }

    #[test]
    fn test_cancelled_context_aborts() {
        let ds = scenario(50.0, EnrollmentStatus::Enroll);
        let graph = OutcomeGraphBuilder::new().build(&ds).remove(0);
        let ctx = EvalContext::background();
        ctx.cancel();
        let result = ThresholdEvaluator::new().evaluate(&graph, &ctx);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
