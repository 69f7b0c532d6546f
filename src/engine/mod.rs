// ==========================================
// 学习成果达成度引擎 - 引擎层
// ==========================================
// 职责: 成果图构建 → 阈值判定 → 群体汇总 / 成绩统计
// 红线: Engine 不拼 SQL, 只消费 OutcomeDataset
// ==========================================

pub mod context;
pub mod error;
pub mod events;
pub mod grade_statistics;
pub mod outcome_graph;
pub mod population_aggregator;
pub mod threshold_evaluator;

// 重导出核心引擎
pub use context::EvalContext;
pub use error::{EngineError, EngineResult};
pub use events::{
    NoOpEventPublisher, OptionalEventPublisher, OutcomeEvent, OutcomeEventPublisher,
    OutcomeEventType,
};
pub use grade_statistics::{
    DescriptiveStats, GradeCount, GradeDistribution, GradeStatisticsCalculator, HistogramBucket,
    HistogramLayout, StudentComposite,
};
pub use outcome_graph::{CourseOutcomeGraph, NodeId, NodeKey, OutcomeGraphBuilder, OutcomeNode};
pub use population_aggregator::{
    ContributingCourse, CourseAttainment, CourseRef, OutcomeAttainment, PopulationAggregator,
    ProgrammeCourseRates, StudentAttainmentRow, StudentOutcomeHistoryItem,
};
pub use threshold_evaluator::{EvaluationMatrix, ThresholdEvaluator};
