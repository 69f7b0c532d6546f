// ==========================================
// 学习成果达成度引擎 - 达成度报表 API
// ==========================================
// 职责: 课程达成度 / 成绩分布 / 专业通过率 / 学生历史 / 缓存刷新
// 架构: API 层 → Repository (加载数据集) → Engine (构图 → 判定 → 汇总)
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::{ConfigManager, EngineConfig};
use crate::domain::dataset::{AttainmentScope, OutcomeDataset};
use crate::domain::types::SnapshotKind;
use crate::engine::context::EvalContext;
use crate::engine::grade_statistics::{GradeDistribution, GradeStatisticsCalculator, HistogramLayout};
use crate::engine::outcome_graph::{CourseOutcomeGraph, OutcomeGraphBuilder};
use crate::engine::population_aggregator::{
    CourseAttainment, PopulationAggregator, ProgrammeCourseRates, StudentAttainmentRow,
    StudentOutcomeHistoryItem,
};
use crate::engine::threshold_evaluator::{EvaluationMatrix, ThresholdEvaluator};
use crate::materializer::cache_materializer::{CacheRefreshScope, OutcomeCacheMaterializer};
use crate::materializer::refresh_worker::WorkerStatus;
use crate::repository::attainment_repo::AttainmentRepository;
use crate::repository::cache_refresh_repo::{CacheRefreshLogEntity, CacheRefreshRepository};
use crate::repository::snapshot_repo::{OutcomeSnapshotRow, SnapshotRepository};

// ==========================================
// 响应 DTO
// ==========================================

/// 单门课程达成度报表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAttainmentReport {
    pub attainment: CourseAttainment,
    pub per_student_pass_matrix: Vec<StudentAttainmentRow>,
}

/// 专业 + 学年区间的课程通过率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammeSuccessRateReport {
    pub programme_id: i64,
    pub from_year: i32,
    pub to_year: i32,
    pub courses: Vec<ProgrammeCourseRates>,
}

/// 学生成果历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentOutcomeHistory {
    pub student_id: i64,
    pub student_code: String,
    pub outcomes: Vec<StudentOutcomeHistoryItem>,
}

/// 快照缓存状态 (worker 状态 + 最近一条刷新日志)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatusView {
    pub worker: WorkerStatus,
    pub latest_log: Option<CacheRefreshLogEntity>,
}

// ==========================================
// OutcomeReportApi
// ==========================================
pub struct OutcomeReportApi {
    attainment_repo: Arc<AttainmentRepository>,
    snapshot_repo: Arc<SnapshotRepository>,
    cache_refresh_repo: Arc<CacheRefreshRepository>,
    config_manager: Arc<ConfigManager>,
    materializer: Arc<OutcomeCacheMaterializer>,
    graph_builder: OutcomeGraphBuilder,
    evaluator: ThresholdEvaluator,
    aggregator: PopulationAggregator,
}

impl OutcomeReportApi {
    pub fn new(
        attainment_repo: Arc<AttainmentRepository>,
        snapshot_repo: Arc<SnapshotRepository>,
        cache_refresh_repo: Arc<CacheRefreshRepository>,
        config_manager: Arc<ConfigManager>,
        materializer: Arc<OutcomeCacheMaterializer>,
    ) -> Self {
        Self {
            attainment_repo,
            snapshot_repo,
            cache_refresh_repo,
            config_manager,
            materializer,
            graph_builder: OutcomeGraphBuilder::new(),
            evaluator: ThresholdEvaluator::new(),
            aggregator: PopulationAggregator::new(),
        }
    }

    fn engine_config(&self) -> ApiResult<EngineConfig> {
        self.config_manager
            .get_engine_config()
            .map_err(|e| ApiError::InternalError(format!("读取引擎配置失败: {}", e)))
    }

    /// 按 report.deadline_ms 构造计算上下文
    pub fn default_context(&self) -> ApiResult<EvalContext> {
        Ok(EvalContext::from_deadline_ms(self.engine_config()?.report_deadline_ms))
    }

    /// 加载 → 构图 → 判定
    fn evaluate_scope(
        &self,
        scope: &AttainmentScope,
        ctx: &EvalContext,
    ) -> ApiResult<(Vec<CourseOutcomeGraph>, Vec<EvaluationMatrix>)> {
        ctx.check()?;
        let dataset: OutcomeDataset = self.attainment_repo.load_dataset(scope)?;
        ctx.check()?;
        let graphs = self.graph_builder.build(&dataset);
        let matrices = self.evaluator.evaluate_all(&graphs, ctx)?;
        Ok((graphs, matrices))
    }

    // ==========================================
    // 课程级报表
    // ==========================================

    /// 单门课程: 各成果通过率 + 学生通过矩阵
    pub fn evaluate_outcome_attainment(&self, course_id: i64) -> ApiResult<CourseAttainmentReport> {
        let ctx = self.default_context()?;
        self.evaluate_outcome_attainment_with_context(course_id, &ctx)
    }

    pub fn evaluate_outcome_attainment_with_context(
        &self,
        course_id: i64,
        ctx: &EvalContext,
    ) -> ApiResult<CourseAttainmentReport> {
        let (graphs, matrices) = self.evaluate_scope(&AttainmentScope::Course(course_id), ctx)?;
        let (graph, matrix) = match (graphs.first(), matrices.first()) {
            (Some(g), Some(m)) => (g, m),
            _ => return Err(ApiError::NotFound(format!("course(id={})不存在", course_id))),
        };

        let attainment = self.aggregator.per_course(graph, matrix);
        if !attainment.applicable {
            tracing::info!(course_id, "课程没有可判定的成果或在读学生");
        }

        Ok(CourseAttainmentReport {
            attainment,
            per_student_pass_matrix: self.aggregator.per_student_matrix(graph, matrix),
        })
    }

    /// 单门课程成绩分布 (直方图 / 描述统计 / GPA / 等级人数)
    pub fn compute_grade_distribution(&self, course_id: i64) -> ApiResult<GradeDistribution> {
        let config = self.engine_config()?;
        let dataset = self
            .attainment_repo
            .load_dataset(&AttainmentScope::Course(course_id))?;
        let calculator = GradeStatisticsCalculator::new(HistogramLayout::with_floor(config.histogram_floor));
        Ok(calculator.compute(course_id, &dataset)?)
    }

    // ==========================================
    // 专业级 / 学生级报表
    // ==========================================

    /// 专业 + 学年闭区间内每门课程的 PO / PLO / SO 通过率
    pub fn get_course_outcome_success_rate(
        &self,
        programme_id: i64,
        from_year: i32,
        to_year: i32,
    ) -> ApiResult<ProgrammeSuccessRateReport> {
        let ctx = self.default_context()?;
        self.get_course_outcome_success_rate_with_context(programme_id, from_year, to_year, &ctx)
    }

    pub fn get_course_outcome_success_rate_with_context(
        &self,
        programme_id: i64,
        from_year: i32,
        to_year: i32,
        ctx: &EvalContext,
    ) -> ApiResult<ProgrammeSuccessRateReport> {
        if from_year > to_year {
            return Err(ApiError::InvalidInput(format!(
                "学年区间无效: from_year={} > to_year={}",
                from_year, to_year
            )));
        }

        let scope = AttainmentScope::Programme {
            programme_id,
            from_year,
            to_year,
        };
        let (graphs, matrices) = self.evaluate_scope(&scope, ctx)?;

        Ok(ProgrammeSuccessRateReport {
            programme_id,
            from_year,
            to_year,
            courses: self.aggregator.per_programme(&graphs, &matrices),
        })
    }

    /// 学生在全部修读课程中各 PLO / PO / SO 的达成历史
    pub fn get_student_outcome_history(&self, student_id: i64) -> ApiResult<StudentOutcomeHistory> {
        let ctx = self.default_context()?;
        self.get_student_outcome_history_with_context(student_id, &ctx)
    }

    pub fn get_student_outcome_history_with_context(
        &self,
        student_id: i64,
        ctx: &EvalContext,
    ) -> ApiResult<StudentOutcomeHistory> {
        let student_code = self
            .attainment_repo
            .find_student_code(student_id)?
            .ok_or_else(|| ApiError::NotFound(format!("student(id={})不存在", student_id)))?;

        let (graphs, matrices) = self.evaluate_scope(&AttainmentScope::Student(student_id), ctx)?;

        Ok(StudentOutcomeHistory {
            student_id,
            student_code,
            outcomes: self.aggregator.per_student_history(student_id, &graphs, &matrices),
        })
    }

    // ==========================================
    // 快照缓存
    // ==========================================

    /// 强制重算指定快照并等待完成
    pub async fn refresh_outcome_cache(&self, scope: CacheRefreshScope) -> ApiResult<Vec<WorkerStatus>> {
        tracing::info!(scope = ?scope, "手动刷新达成度快照");
        Ok(self.materializer.refresh(scope, Some("OutcomeReportApi")).await?)
    }

    pub fn list_plo_course_snapshot(&self, programme_id: i64) -> ApiResult<Vec<OutcomeSnapshotRow>> {
        Ok(self.snapshot_repo.list_by_programme(SnapshotKind::Plo, programme_id)?)
    }

    pub fn list_po_course_snapshot(&self, programme_id: i64) -> ApiResult<Vec<OutcomeSnapshotRow>> {
        Ok(self.snapshot_repo.list_by_programme(SnapshotKind::Po, programme_id)?)
    }

    pub fn cache_status(&self) -> ApiResult<Vec<CacheStatusView>> {
        self.materializer
            .status()
            .into_iter()
            .map(|worker| -> ApiResult<CacheStatusView> {
                let latest_log = self.cache_refresh_repo.find_latest_log(worker.snapshot)?;
                Ok(CacheStatusView { worker, latest_log })
            })
            .collect()
    }
}
