// ==========================================
// 学习成果达成度引擎 - 只读数据集
// ==========================================
// 职责: 定义存储协作方返回的扁平行 (flattened rows)
// 说明: 引擎只消费这些行,不关心它们来自哪张表
// ==========================================

use crate::domain::course::CourseInfo;
use crate::domain::types::{EnrollmentStatus, OutcomeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// 计算范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttainmentScope {
    /// 单门课程
    Course(i64),
    /// 单个学生修读过的全部课程
    Student(i64),
    /// 专业 + 学年区间 (闭区间)
    Programme {
        programme_id: i64,
        from_year: i32,
        to_year: i32,
    },
    /// 系统内全部课程 (缓存物化使用)
    AllCourses,
}

impl AttainmentScope {
    pub fn describe(&self) -> String {
        match self {
            AttainmentScope::Course(id) => format!("course={}", id),
            AttainmentScope::Student(id) => format!("student={}", id),
            AttainmentScope::Programme {
                programme_id,
                from_year,
                to_year,
            } => format!("programme={} years=[{}, {}]", programme_id, from_year, to_year),
            AttainmentScope::AllCourses => "all_courses".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub course_id: i64,
    pub student_id: i64,
    pub student_code: String,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub assignment_id: i64,
    pub course_id: i64,
    pub group_id: i64,
    /// 作业组权重
    pub group_weight: f64,
    pub name: String,
    pub max_score: f64,
    pub expected_score_percentage: f64,
    pub is_included_in_clo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloRow {
    pub clo_id: i64,
    pub course_id: i64,
    pub code: String,
    pub expected_passing_assignment_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentCloLinkRow {
    pub assignment_id: i64,
    pub clo_id: i64,
}

/// CLO → PO / PLO / SO 关联
///
/// PLO/SO 通过子成果关联,`via_sub_id` 记录经过的 sub-PLO / sub-SO;
/// 同一 CLO 经多个子成果到达同一成果时会出现多行,由图构建阶段去重。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloOutcomeLinkRow {
    pub clo_id: i64,
    pub kind: OutcomeKind,
    pub outcome_id: i64,
    pub outcome_code: String,
    pub via_sub_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub student_id: i64,
    pub assignment_id: i64,
    pub score: f64,
}

/// 某一计算范围的完整只读输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDataset {
    pub courses: Vec<CourseInfo>,
    pub enrollments: Vec<EnrollmentRow>,
    pub assignments: Vec<AssignmentRow>,
    pub clos: Vec<CloRow>,
    pub assignment_clo_links: Vec<AssignmentCloLinkRow>,
    pub clo_outcome_links: Vec<CloOutcomeLinkRow>,
    pub scores: Vec<ScoreRow>,
}

impl OutcomeDataset {
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn course(&self, course_id: i64) -> Option<&CourseInfo> {
        self.courses.iter().find(|c| c.course_id == course_id)
    }

    /// 课程在读学生 (student_id, student_code),按 student_id 升序
    ///
    /// 同一学生同时存在 ENROLL 与 WITHDRAW 记录时以退课为准。
    pub fn enrolled_students(&self, course_id: i64) -> Vec<(i64, String)> {
        let mut withdrawn: HashSet<i64> = HashSet::new();
        let mut enrolled: BTreeMap<i64, String> = BTreeMap::new();
        for e in self.enrollments.iter().filter(|e| e.course_id == course_id) {
            match e.status {
                EnrollmentStatus::Enroll => {
                    enrolled.insert(e.student_id, e.student_code.clone());
                }
                EnrollmentStatus::Withdraw => {
                    withdrawn.insert(e.student_id);
                }
            }
        }
        enrolled.retain(|id, _| !withdrawn.contains(id));
        enrolled.into_iter().collect()
    }
}
