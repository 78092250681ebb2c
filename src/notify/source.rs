// ==========================================
// 车间生产执行调度系统 - 变更来源抽象
// ==========================================
// 职责: 隔离"发生了变更"的检测方式
//       可由进程内发射器、数据库触发器或 outbox 表实现
// 说明: 通知总线只依赖 ChangeSource, 不假设具体传输
// ==========================================

use crate::domain::change::ChangeEvent;
use crate::engine::events::ChangePublisher;
use async_trait::async_trait;
use tokio::sync::mpsc;

// ==========================================
// ChangeSource Trait
// ==========================================
#[async_trait]
pub trait ChangeSource: Send {
    /// 等待下一条变更
    ///
    /// # 返回
    /// - Some(event): 新变更
    /// - None: 来源已关闭, 不会再产生变更
    async fn next_change(&mut self) -> Option<ChangeEvent>;

    /// 来源名称（日志用）
    fn name(&self) -> &str {
        "change-source"
    }
}

/// 创建进程内变更通道
pub fn in_process_channel() -> (ChangeEmitter, InProcessChangeSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChangeEmitter { tx }, InProcessChangeSource { rx })
}

/// 进程内变更发射端
///
/// 实现 ChangePublisher, 可直接交给 API 层使用
#[derive(Clone)]
pub struct ChangeEmitter {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeEmitter {
    /// 来源是否仍在接收
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl ChangePublisher for ChangeEmitter {
    fn publish(&self, event: ChangeEvent) -> usize {
        match self.tx.send(event) {
            Ok(()) => 1,
            Err(_) => {
                tracing::debug!("变更来源已关闭, 丢弃事件");
                0
            }
        }
    }
}

/// 进程内变更来源
pub struct InProcessChangeSource {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[async_trait]
impl ChangeSource for InProcessChangeSource {
    async fn next_change(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    fn name(&self) -> &str {
        "in-process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChangeOperation, EntityType};

    #[tokio::test]
    async fn test_emitter_feeds_source_in_order() {
        let (emitter, mut source) = in_process_channel();
        assert_eq!(
            emitter.publish(ChangeEvent::new(EntityType::Plan, 1, ChangeOperation::Insert)),
            1
        );
        emitter.publish(ChangeEvent::new(EntityType::Plan, 1, ChangeOperation::Update));
        drop(emitter);

        assert_eq!(source.next_change().await.unwrap().operation, ChangeOperation::Insert);
        assert_eq!(source.next_change().await.unwrap().operation, ChangeOperation::Update);
        assert!(source.next_change().await.is_none());
    }
}
