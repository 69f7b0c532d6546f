// ==========================================
// 学习成果达成度引擎 - 引擎层事件发布
// ==========================================
// 职责: 定义课程体系变更事件发布 trait,实现依赖倒置
// 说明: Engine 层定义 trait,Materializer 层实现适配器
// 约束: 发布只做标记,不能让写操作等待缓存重算
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 变更事件类型
// ==========================================

/// 会使达成度快照失效的写操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeEventType {
    /// CLO 增删改
    CloChanged,
    /// CLO ↔ PO 关联变更
    CloPoLinkChanged,
    /// CLO ↔ sub-PLO 关联变更
    CloSubPloLinkChanged,
    /// CLO ↔ sub-SO 关联变更
    CloSubSoLinkChanged,
    PloChanged,
    SubPloChanged,
    PoChanged,
    SoChanged,
    SubSoChanged,
    /// 选课 / 退课
    EnrollmentChanged,
    /// 成绩录入
    ScoreChanged,
    /// 作业 ↔ CLO 关联或作业阈值变更
    AssignmentCloLinkChanged,
    /// 课程阈值 / 等级分数线变更
    CourseChanged,
    /// 手动触发
    ManualRefresh,
}

impl OutcomeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeEventType::CloChanged => "CloChanged",
            OutcomeEventType::CloPoLinkChanged => "CloPoLinkChanged",
            OutcomeEventType::CloSubPloLinkChanged => "CloSubPloLinkChanged",
            OutcomeEventType::CloSubSoLinkChanged => "CloSubSoLinkChanged",
            OutcomeEventType::PloChanged => "PloChanged",
            OutcomeEventType::SubPloChanged => "SubPloChanged",
            OutcomeEventType::PoChanged => "PoChanged",
            OutcomeEventType::SoChanged => "SoChanged",
            OutcomeEventType::SubSoChanged => "SubSoChanged",
            OutcomeEventType::EnrollmentChanged => "EnrollmentChanged",
            OutcomeEventType::ScoreChanged => "ScoreChanged",
            OutcomeEventType::AssignmentCloLinkChanged => "AssignmentCloLinkChanged",
            OutcomeEventType::CourseChanged => "CourseChanged",
            OutcomeEventType::ManualRefresh => "ManualRefresh",
        }
    }
}

/// 课程体系变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub event_type: OutcomeEventType,
    /// 事件来源描述 (例如仓储名)
    pub source: Option<String>,
    /// 受影响课程 (None 表示无法定位到单门课程)
    pub course_id: Option<i64>,
    /// 被修改实体的主键
    pub entity_id: Option<i64>,
}

impl OutcomeEvent {
    pub fn new(event_type: OutcomeEventType, source: Option<String>) -> Self {
        Self {
            event_type,
            source,
            course_id: None,
            entity_id: None,
        }
    }

    pub fn for_course(mut self, course_id: i64) -> Self {
        self.course_id = Some(course_id);
        self
    }

    pub fn for_entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn manual(source: Option<String>) -> Self {
        Self::new(OutcomeEventType::ManualRefresh, source)
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 课程体系变更事件发布者
///
/// # 实现说明
/// - Materializer 层的 `CacheInvalidationAdapter` 实现此 trait
/// - 只把对应快照标记为脏,由后台 worker 合并重算
pub trait OutcomeEventPublisher: Send + Sync {
    /// 发布事件
    ///
    /// # 返回
    /// - `Ok(summary)`: 被标记的快照列表 (如果支持) 或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: OutcomeEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者 (单元测试使用)
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl OutcomeEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: OutcomeEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - event_type={}, course_id={:?}",
            event.event_type.as_str(),
            event.course_id
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn OutcomeEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn OutcomeEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件 (如果有发布者)
    pub fn publish(&self, event: OutcomeEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者,跳过事件 - event_type={}",
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<OutcomeEvent>>,
    }

    impl OutcomeEventPublisher for RecordingPublisher {
        fn publish(&self, event: OutcomeEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.events.lock().unwrap().push(event);
            Ok("recorded".to_string())
        }
    }

    #[test]
    fn test_event_builders() {
        let event = OutcomeEvent::new(OutcomeEventType::ScoreChanged, Some("ScoreRepository".to_string()))
            .for_course(7)
            .for_entity(42);
        assert_eq!(event.course_id, Some(7));
        assert_eq!(event.entity_id, Some(42));
        assert_eq!(OutcomeEvent::manual(None).event_type, OutcomeEventType::ManualRefresh);
    }

    #[test]
    fn test_noop_publisher() {
        let result = NoOpEventPublisher.publish(OutcomeEvent::manual(None));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalEventPublisher::none();
        assert!(!publisher.is_configured());
        assert!(publisher.publish(OutcomeEvent::manual(None)).is_ok());
    }

    #[test]
    fn test_optional_publisher_forwards() {
        let recorder = Arc::new(RecordingPublisher::default());
        let publisher = OptionalEventPublisher::with_publisher(recorder.clone());
        assert!(publisher.is_configured());

        let summary = publisher
            .publish(OutcomeEvent::new(OutcomeEventType::CloChanged, None))
            .unwrap();
        assert_eq!(summary, "recorded");
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }
}
