// ==========================================
// 学习成果达成度引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、只读数据集
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod course;
pub mod dataset;
pub mod types;

// 重导出核心类型
pub use course::{CourseInfo, CriteriaGrade};
pub use dataset::{
    AssignmentCloLinkRow, AssignmentRow, AttainmentScope, CloOutcomeLinkRow, CloRow,
    EnrollmentRow, OutcomeDataset, ScoreRow,
};
pub use types::{EnrollmentStatus, LetterGrade, OutcomeKind, SnapshotKind, Verdict};
