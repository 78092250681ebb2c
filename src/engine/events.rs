// ==========================================
// 车间生产执行调度系统 - 变更事件发布
// ==========================================
// 职责: 定义变更发布 trait，实现依赖倒置
// 说明: Engine/API 层只依赖 trait, 通知总线实现它
// 红线: 发布不阻塞、不失败, 慢订阅者由实现方丢弃
// ==========================================

use crate::domain::change::ChangeEvent;
use std::sync::Arc;

/// 变更发布者 Trait
///
/// # 实现说明
/// - `notify::NotificationBus` 直接实现此 trait
/// - `notify::ChangeEmitter` 将事件写入进程内变更源
pub trait ChangePublisher: Send + Sync {
    /// 发布变更事件, 返回投递到的订阅者数量
    fn publish(&self, event: ChangeEvent) -> usize;
}

/// 空操作发布者
///
/// 用于不需要推送的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpChangePublisher;

impl ChangePublisher for NoOpChangePublisher {
    fn publish(&self, event: ChangeEvent) -> usize {
        tracing::trace!(
            entity_type = %event.entity_type,
            entity_id = event.entity_id,
            "NoOpChangePublisher: 跳过事件发布"
        );
        0
    }
}

/// 可选的发布者包装
///
/// 简化 Option<Arc<dyn ChangePublisher>> 的使用
#[derive(Clone, Default)]
pub struct OptionalChangePublisher {
    inner: Option<Arc<dyn ChangePublisher>>,
}

impl OptionalChangePublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn ChangePublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => 0,
        }
    }

    /// 批量发布, 保持顺序
    pub fn publish_all<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        events.into_iter().map(|e| self.publish(e)).sum()
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChangeOperation, EntityType};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ChangeEvent>>);

    impl ChangePublisher for Recording {
        fn publish(&self, event: ChangeEvent) -> usize {
            self.0.lock().unwrap().push(event);
            1
        }
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalChangePublisher::none();
        assert!(!publisher.is_configured());
        let event = ChangeEvent::new(EntityType::Plan, 1, ChangeOperation::Insert);
        assert_eq!(publisher.publish(event), 0);
    }

    #[test]
    fn test_optional_publisher_forwards_in_order() {
        let recording = Arc::new(Recording::default());
        let publisher = OptionalChangePublisher::with_publisher(recording.clone());

        let delivered = publisher.publish_all(vec![
            ChangeEvent::new(EntityType::Assignment, 1, ChangeOperation::Insert),
            ChangeEvent::new(EntityType::Assignment, 1, ChangeOperation::Update),
        ]);
        assert_eq!(delivered, 2);
        let seen = recording.0.lock().unwrap();
        assert_eq!(seen[0].operation, ChangeOperation::Insert);
        assert_eq!(seen[1].operation, ChangeOperation::Update);
    }

    #[test]
    fn test_noop_publisher() {
        let event = ChangeEvent::new(EntityType::Worker, 9, ChangeOperation::Update);
        assert_eq!(NoOpChangePublisher.publish(event), 0);
    }
}
