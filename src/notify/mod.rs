// ==========================================
// 车间生产执行调度系统 - 变更通知层
// ==========================================
// 职责: 变更捕获 → 通道 → 按订阅过滤扇出
// 红线: 尽力而为的至少一次投递, 无持久队列
// ==========================================

pub mod bus;
pub mod filter;
pub mod source;

pub use bus::{
    BusStats, NotificationBus, SubscriberId, Subscription, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_SUBSCRIBER_BUFFER,
};
pub use filter::{payload_keys, SubscriptionFilter};
pub use source::{in_process_channel, ChangeEmitter, ChangeSource, InProcessChangeSource};
