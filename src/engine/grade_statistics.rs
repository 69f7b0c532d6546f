// ==========================================
// 学习成果达成度引擎 - 成绩统计引擎
// ==========================================
// 职责: 综合成绩 → 分数段直方图 / 字母等级 / 描述统计 / GPA
// 公式: 综合成绩 = Σ_作业组( 权重 × Σ得分 / Σ满分 )
//       缺考按 0 分;Σ满分 = 0 的作业组不计
// 说明: 与阈值判定相互独立,所有作业都参与 (不看 is_included_in_clo)
// ==========================================

use crate::domain::course::{CourseInfo, CriteriaGrade};
use crate::domain::dataset::OutcomeDataset;
use crate::domain::types::LetterGrade;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::population_aggregator::CourseRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const BUCKET_WIDTH: u32 = 5;

// ==========================================
// HistogramLayout - 分数段划分
// ==========================================
/// 直方图分数段
///
/// 首段为 `0-floor`,之后每 5 分一段直到 100 (`51-55`, …, `96-100`)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramLayout {
    floor: u32,
}

impl HistogramLayout {
    /// floor 取 5 的倍数并限制在 [5, 100]
    pub fn with_floor(floor: u32) -> Self {
        let floor = floor.clamp(BUCKET_WIDTH, 100) / BUCKET_WIDTH * BUCKET_WIDTH;
        Self { floor }
    }

    /// 从 0 开始每 5 分一段
    pub fn uniform() -> Self {
        Self::with_floor(BUCKET_WIDTH)
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn bucket_count(&self) -> usize {
        ((100 - self.floor) / BUCKET_WIDTH) as usize + 1
    }

    /// 分数段 (下界, 上界),均为闭区间
    pub fn bounds(&self, index: usize) -> (u32, u32) {
        if index == 0 {
            (0, self.floor)
        } else {
            let upper = self.floor + index as u32 * BUCKET_WIDTH;
            (upper - BUCKET_WIDTH + 1, upper)
        }
    }

    /// 分数所在段: 上界 = ceil(score / 5) * 5,再夹到 [floor, 100]
    pub fn bucket_index(&self, score: f64) -> usize {
        let upper = (score / BUCKET_WIDTH as f64).ceil() * BUCKET_WIDTH as f64;
        let upper = upper.clamp(self.floor as f64, 100.0) as u32;
        ((upper - self.floor) / BUCKET_WIDTH) as usize
    }

    pub fn label(&self, index: usize) -> String {
        let (lower, upper) = self.bounds(index);
        format!("{}-{}", lower, upper)
    }
}

impl Default for HistogramLayout {
    fn default() -> Self {
        Self::with_floor(50)
    }
}

// ==========================================
// 输出结构
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub label: String,
    pub lower: u32,
    pub upper: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    /// 总体标准差
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeCount {
    pub grade: LetterGrade,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentComposite {
    pub student_id: i64,
    pub student_code: String,
    pub composite: f64,
    pub grade: LetterGrade,
}

/// 单门课程的成绩分布
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeDistribution {
    pub course: CourseRef,
    pub histogram: Vec<HistogramBucket>,
    /// 无在读学生时为 None
    pub stats: Option<DescriptiveStats>,
    pub gpa: Option<f64>,
    pub grade_counts: Vec<GradeCount>,
    pub students: Vec<StudentComposite>,
}

// ==========================================
// GradeStatisticsCalculator
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct GradeStatisticsCalculator {
    layout: HistogramLayout,
}

impl GradeStatisticsCalculator {
    pub fn new(layout: HistogramLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> HistogramLayout {
        self.layout
    }

    /// 计算课程成绩分布
    ///
    /// # 错误
    /// - 课程不在数据集中: NotFound
    /// - 等级分数线非单调: InvalidCriteriaGrade
    pub fn compute(&self, course_id: i64, dataset: &OutcomeDataset) -> EngineResult<GradeDistribution> {
        let course = dataset.course(course_id).ok_or_else(|| EngineError::NotFound {
            scope: "course".to_string(),
            id: course_id.to_string(),
        })?;

        let composites = Self::composite_scores(course, dataset);
        self.summarize(course, composites)
    }

    /// 在读学生的综合成绩 (student_id, student_code, composite),按 student_id 升序
    pub fn composite_scores(course: &CourseInfo, dataset: &OutcomeDataset) -> Vec<(i64, String, f64)> {
        // group_id → (权重, [(assignment_id, max_score)])
        let mut groups: BTreeMap<i64, (f64, Vec<(i64, f64)>)> = BTreeMap::new();
        for a in dataset.assignments.iter().filter(|a| a.course_id == course.course_id) {
            groups
                .entry(a.group_id)
                .or_insert_with(|| (a.group_weight, Vec::new()))
                .1
                .push((a.assignment_id, a.max_score));
        }

        let scores: HashMap<(i64, i64), f64> = dataset
            .scores
            .iter()
            .map(|s| ((s.student_id, s.assignment_id), s.score))
            .collect();

        dataset
            .enrolled_students(course.course_id)
            .into_iter()
            .map(|(student_id, student_code)| {
                let composite = groups
                    .values()
                    .filter_map(|(weight, assignments)| {
                        let max_total: f64 = assignments.iter().map(|(_, max)| *max).sum();
                        if max_total <= 0.0 {
                            return None;
                        }
                        let earned: f64 = assignments
                            .iter()
                            .map(|(id, _)| scores.get(&(student_id, *id)).copied().unwrap_or(0.0))
                            .sum();
                        Some(weight * earned / max_total)
                    })
                    .sum();
                (student_id, student_code, composite)
            })
            .collect()
    }

    /// 由综合成绩汇总分布
    pub fn summarize(
        &self,
        course: &CourseInfo,
        composites: Vec<(i64, String, f64)>,
    ) -> EngineResult<GradeDistribution> {
        let criteria: &CriteriaGrade = &course.criteria_grade;
        criteria.validate().map_err(EngineError::InvalidCriteriaGrade)?;

        let mut histogram: Vec<HistogramBucket> = (0..self.layout.bucket_count())
            .map(|idx| {
                let (lower, upper) = self.layout.bounds(idx);
                HistogramBucket {
                    label: self.layout.label(idx),
                    lower,
                    upper,
                    count: 0,
                }
            })
            .collect();

        let mut grade_counts: Vec<GradeCount> = LetterGrade::ALL
            .iter()
            .map(|grade| GradeCount { grade: *grade, count: 0 })
            .collect();

        let students: Vec<StudentComposite> = composites
            .into_iter()
            .map(|(student_id, student_code, composite)| {
                let grade = criteria.classify(composite);
                histogram[self.layout.bucket_index(composite)].count += 1;
                if let Some(gc) = grade_counts.iter_mut().find(|gc| gc.grade == grade) {
                    gc.count += 1;
                }
                StudentComposite {
                    student_id,
                    student_code,
                    composite,
                    grade,
                }
            })
            .collect();

        let values: Vec<f64> = students.iter().map(|s| s.composite).collect();
        let stats = descriptive_stats(&values);
        let gpa = if students.is_empty() {
            None
        } else {
            let points: f64 = grade_counts
                .iter()
                .map(|gc| gc.count as f64 * gc.grade.grade_point())
                .sum();
            Some(points / students.len() as f64)
        };

        tracing::debug!(
            course_id = course.course_id,
            students = students.len(),
            "成绩分布计算完成"
        );

        Ok(GradeDistribution {
            course: CourseRef::from(course),
            histogram,
            stats,
            gpa,
            grade_counts,
            students,
        })
    }
}

/// min / max / mean / median / mode / 总体标准差;空输入返回 None
pub fn descriptive_stats(values: &[f64]) -> Option<DescriptiveStats> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();

    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

    Some(DescriptiveStats {
        count: n,
        min: sorted[0],
        max: sorted[n - 1],
        mean,
        median,
        mode: mode_of_sorted(&sorted),
        std_dev: variance.sqrt(),
    })
}

/// 众数: 按两位小数归并,频次最高者中取最小的一组,返回该组第一个原始值
fn mode_of_sorted(sorted: &[f64]) -> f64 {
    // (归并键, 频次, 组内首个原始值)
    let mut best: Option<(i64, usize, f64)> = None;
    let mut current: Option<(i64, usize, f64)> = None;
    for &v in sorted {
        let key = (v * 100.0).round() as i64;
        current = match current {
            Some((k, count, first)) if k == key => Some((k, count + 1, first)),
            _ => Some((key, 1, v)),
        };
        // 严格大于: 并列时保留先出现 (更小) 的组
        if let Some(cur) = current {
            if best.map_or(true, |b| cur.1 > b.1) {
                best = Some(cur);
            }
        }
    }
    best.map_or(0.0, |(_, _, first)| first)
}
