// ==========================================
// 车间生产执行调度系统 - 变更事件
// ==========================================
// 职责: 推送总线上传递的变更记录
// 红线: 不持久化, 仅存在于通知总线
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::types::{ChangeOperation, EntityType};

/// 变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub operation: ChangeOperation,
    /// 变更字段摘要
    pub fields: Vec<String>,
    /// 过滤用载荷（workerId / stationId / planId ...）
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(entity_type: EntityType, entity_id: i64, operation: ChangeOperation) -> Self {
        Self {
            entity_type,
            entity_id,
            operation,
            fields: Vec::new(),
            payload: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// 写入载荷字段; None 值写为 null
    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// 读取载荷中的整型字段
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }
}

/// 订阅端收到的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusMessage {
    Event(ChangeEvent),
    Heartbeat { at: DateTime<Utc> },
}

impl BusMessage {
    pub fn as_event(&self) -> Option<&ChangeEvent> {
        match self {
            BusMessage::Event(e) => Some(e),
            BusMessage::Heartbeat { .. } => None,
        }
    }
}
