// ==========================================
// 学习成果达成度引擎 - 领域类型定义
// ==========================================
// 职责: 成果层级、选课状态、字母等级、判定结果等枚举
// 约束: 所有枚举均可序列化,数据库存储使用大写字符串
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// OutcomeKind - 成果节点类型
// ==========================================
/// 成果层级中的节点类型
///
/// 顺序即汇总方向: Assignment → Clo → (Po | Plo | So)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// 作业
    Assignment,
    /// 课程学习成果
    Clo,
    /// 专业成果 (Program Outcome)
    Po,
    /// 专业学习成果 (经 sub-PLO 汇总)
    Plo,
    /// 学生成果 (经 sub-SO 汇总)
    So,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Assignment => "ASSIGNMENT",
            OutcomeKind::Clo => "CLO",
            OutcomeKind::Po => "PO",
            OutcomeKind::Plo => "PLO",
            OutcomeKind::So => "SO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASSIGNMENT" => Some(OutcomeKind::Assignment),
            "CLO" => Some(OutcomeKind::Clo),
            "PO" => Some(OutcomeKind::Po),
            "PLO" => Some(OutcomeKind::Plo),
            "SO" => Some(OutcomeKind::So),
            _ => None,
        }
    }

    /// 是否为课程之上的汇总层 (PO/PLO/SO)
    pub fn is_program_level(&self) -> bool {
        matches!(self, OutcomeKind::Po | OutcomeKind::Plo | OutcomeKind::So)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// EnrollmentStatus - 选课状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    /// 在读
    Enroll,
    /// 退课 (从所有层级的分子和分母中剔除)
    Withdraw,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enroll => "ENROLL",
            EnrollmentStatus::Withdraw => "WITHDRAW",
        }
    }

    /// 未知状态按退课处理,避免把脏数据计入达成度
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENROLL" => EnrollmentStatus::Enroll,
            _ => EnrollmentStatus::Withdraw,
        }
    }
}

// ==========================================
// Verdict - 单个 (学生, 节点) 的判定结果
// ==========================================
/// 判定结果
///
/// `NotApplicable` 表示分母为空 (无关联作业/无关联 CLO),
/// 在上一层的分子和分母中同时剔除,不计为失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    NotApplicable,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NotApplicable => "N/A",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn is_applicable(&self) -> bool {
        !matches!(self, Verdict::NotApplicable)
    }
}

// ==========================================
// LetterGrade - 字母等级
// ==========================================
/// 字母等级,按从高到低的判定顺序声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    BP,
    B,
    CP,
    C,
    DP,
    D,
    F,
}

impl LetterGrade {
    /// 判定顺序 (高 → 低)
    pub const ALL: [LetterGrade; 8] = [
        LetterGrade::A,
        LetterGrade::BP,
        LetterGrade::B,
        LetterGrade::CP,
        LetterGrade::C,
        LetterGrade::DP,
        LetterGrade::D,
        LetterGrade::F,
    ];

    /// 绩点
    pub fn grade_point(&self) -> f64 {
        match self {
            LetterGrade::A => 4.0,
            LetterGrade::BP => 3.5,
            LetterGrade::B => 3.0,
            LetterGrade::CP => 2.5,
            LetterGrade::C => 2.0,
            LetterGrade::DP => 1.5,
            LetterGrade::D => 1.0,
            LetterGrade::F => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::BP => "BP",
            LetterGrade::B => "B",
            LetterGrade::CP => "CP",
            LetterGrade::C => "C",
            LetterGrade::DP => "DP",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// SnapshotKind - 预联表快照
// ==========================================
/// 缓存物化维护的两张快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SnapshotKind {
    /// PLO + 课程信息 (plo_course_snapshot)
    Plo,
    /// PO + 课程信息 (po_course_snapshot)
    Po,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 2] = [SnapshotKind::Plo, SnapshotKind::Po];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Plo => "PLO",
            SnapshotKind::Po => "PO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLO" => Some(SnapshotKind::Plo),
            "PO" => Some(SnapshotKind::Po),
            _ => None,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            SnapshotKind::Plo => "plo_course_snapshot",
            SnapshotKind::Po => "po_course_snapshot",
        }
    }

    /// 快照汇总的成果层级
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            SnapshotKind::Plo => OutcomeKind::Plo,
            SnapshotKind::Po => OutcomeKind::Po,
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kind_roundtrip_str() {
        for kind in [
            OutcomeKind::Assignment,
            OutcomeKind::Clo,
            OutcomeKind::Po,
            OutcomeKind::Plo,
            OutcomeKind::So,
        ] {
            assert_eq!(OutcomeKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(OutcomeKind::from_str("plo"), Some(OutcomeKind::Plo));
        assert_eq!(OutcomeKind::from_str("XYZ"), None);
    }

    #[test]
    fn test_enrollment_status_unknown_is_withdraw() {
        assert_eq!(EnrollmentStatus::from_str("ENROLL"), EnrollmentStatus::Enroll);
        assert_eq!(EnrollmentStatus::from_str("withdraw"), EnrollmentStatus::Withdraw);
        assert_eq!(EnrollmentStatus::from_str("???"), EnrollmentStatus::Withdraw);
    }

    #[test]
    fn test_grade_points() {
        let points: Vec<f64> = LetterGrade::ALL.iter().map(|g| g.grade_point()).collect();
        assert_eq!(points, vec![4.0, 3.5, 3.0, 2.5, 2.0, 1.5, 1.0, 0.0]);
    }

    #[test]
    fn test_snapshot_kind_round_trip_and_tables() {
        for kind in SnapshotKind::ALL {
            assert_eq!(SnapshotKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(SnapshotKind::from_str("so"), None);
        assert_eq!(SnapshotKind::Po.table_name(), "po_course_snapshot");
        assert_eq!(SnapshotKind::Plo.outcome_kind(), OutcomeKind::Plo);
    }
}
