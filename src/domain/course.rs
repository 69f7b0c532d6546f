// ==========================================
// 学习成果达成度引擎 - 课程与等级标准
// ==========================================
// 职责: 课程元数据 + CriteriaGrade (八档等级分数线)
// 约束: A ≥ BP ≥ B ≥ CP ≥ C ≥ DP ≥ D ≥ F ≥ 0, 且均不超过 100
// ==========================================

use crate::domain::types::LetterGrade;
use serde::{Deserialize, Serialize};

// ==========================================
// CriteriaGrade - 等级分数线
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriteriaGrade {
    pub a: f64,
    pub bp: f64,
    pub b: f64,
    pub cp: f64,
    pub c: f64,
    pub dp: f64,
    pub d: f64,
    pub f: f64,
}

impl CriteriaGrade {
    /// 按 A..F 顺序构造
    pub fn from_cutoffs(cutoffs: [f64; 8]) -> Self {
        Self {
            a: cutoffs[0],
            bp: cutoffs[1],
            b: cutoffs[2],
            cp: cutoffs[3],
            c: cutoffs[4],
            dp: cutoffs[5],
            d: cutoffs[6],
            f: cutoffs[7],
        }
    }

    /// 按判定顺序 (A..F) 返回分数线
    pub fn cutoffs(&self) -> [f64; 8] {
        [self.a, self.bp, self.b, self.cp, self.c, self.dp, self.d, self.f]
    }

    pub fn cutoff(&self, grade: LetterGrade) -> f64 {
        match grade {
            LetterGrade::A => self.a,
            LetterGrade::BP => self.bp,
            LetterGrade::B => self.b,
            LetterGrade::CP => self.cp,
            LetterGrade::C => self.c,
            LetterGrade::DP => self.dp,
            LetterGrade::D => self.d,
            LetterGrade::F => self.f,
        }
    }

    /// 分数线是否单调不增且落在 [0, 100]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 校验分数线,返回第一条违规原因
    pub fn validate(&self) -> Result<(), String> {
        let cutoffs = self.cutoffs();

        for (grade, value) in LetterGrade::ALL.iter().zip(cutoffs.iter()) {
            if !value.is_finite() || *value < 0.0 || *value > 100.0 {
                return Err(format!("等级 {} 分数线 {} 超出 [0, 100]", grade, value));
            }
        }

        for i in 1..cutoffs.len() {
            if cutoffs[i] > cutoffs[i - 1] {
                return Err(format!(
                    "等级分数线必须单调不增: {}={} 高于 {}={}",
                    LetterGrade::ALL[i],
                    cutoffs[i],
                    LetterGrade::ALL[i - 1],
                    cutoffs[i - 1]
                ));
            }
        }

        Ok(())
    }

    /// 按判定顺序返回第一个满足 `score >= cutoff` 的等级
    ///
    /// 调用方必须先确认 `is_valid()`; F 的分数线 ≥ 0,
    /// 负分兜底为 F。
    pub fn classify(&self, score: f64) -> LetterGrade {
        LetterGrade::ALL
            .iter()
            .copied()
            .find(|grade| score >= self.cutoff(*grade))
            .unwrap_or(LetterGrade::F)
    }
}

impl Default for CriteriaGrade {
    fn default() -> Self {
        Self::from_cutoffs([80.0, 75.0, 70.0, 65.0, 60.0, 55.0, 50.0, 0.0])
    }
}

// ==========================================
// CourseInfo - 课程元数据
// ==========================================
/// 课程 (达成度计算只读取这些字段)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub course_id: i64,
    pub programme_id: i64,
    pub code: String,
    pub name: String,
    pub year: i32,
    /// 学年内学期序号
    pub semester: i32,
    /// PO/PLO/SO 层级阈值 (%)
    pub expected_passing_clo_percentage: f64,
    pub criteria_grade: CriteriaGrade,
}

impl CourseInfo {
    /// 自然排序键: 课程代码 → 学年 → 学期
    pub fn natural_key(&self) -> (&str, i32, i32, i64) {
        (self.code.as_str(), self.year, self.semester, self.course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_criteria_is_valid() {
        assert!(CriteriaGrade::default().is_valid());
    }

    #[test]
    fn test_non_monotonic_criteria_rejected() {
        let grade = CriteriaGrade::from_cutoffs([80.0, 85.0, 70.0, 65.0, 60.0, 55.0, 50.0, 0.0]);
        assert!(!grade.is_valid());
        let err = grade.validate().unwrap_err();
        assert!(err.contains("BP"));
    }

    #[test]
    fn test_negative_floor_rejected() {
        let grade = CriteriaGrade::from_cutoffs([80.0, 75.0, 70.0, 65.0, 60.0, 55.0, 50.0, -1.0]);
        assert!(!grade.is_valid());
    }

    #[test]
    fn test_equal_cutoffs_allowed_and_higher_band_wins() {
        // A≥80, B≥60, 其余折叠
        let grade = CriteriaGrade::from_cutoffs([80.0, 80.0, 60.0, 60.0, 60.0, 60.0, 60.0, 0.0]);
        assert!(grade.is_valid());
        assert_eq!(grade.classify(80.0), LetterGrade::A);
        assert_eq!(grade.classify(79.99), LetterGrade::B);
        assert_eq!(grade.classify(60.0), LetterGrade::B);
        assert_eq!(grade.classify(59.0), LetterGrade::F);
    }
}
