// ==========================================
// 车间生产执行调度系统 - 变更通知总线
// ==========================================
// 职责: 变更事件按订阅过滤器扇出到各订阅者
// 约定:
// - 发布不阻塞: 订阅者缓冲区满或已断开即被摘除
// - 同一订阅者按发布顺序接收（每订阅者一个有界 mpsc）
// - 心跳与事件流量无关, 按固定周期发送且不经过过滤器
// - Subscription 被 drop 或其取消令牌被触发即注销
// ==========================================

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::change::{BusMessage, ChangeEvent};
use crate::engine::events::ChangePublisher;
use crate::notify::filter::SubscriptionFilter;
use crate::notify::source::ChangeSource;

/// 默认每订阅者缓冲条数
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// 默认心跳周期（秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

pub type SubscriberId = u64;

struct Slot {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<BusMessage>,
    cancel: CancellationToken,
}

struct BusInner {
    subscribers: RwLock<HashMap<SubscriberId, Slot>>,
    next_id: AtomicU64,
    buffer: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<SubscriberId, Slot>> {
        // 表内只有通道句柄, 中毒后数据仍可用
        self.subscribers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<SubscriberId, Slot>> {
        self.subscribers.write().unwrap_or_else(|p| p.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        match self.write_slots().remove(&id) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 投递一条消息给所有满足条件的订阅者, 顺带摘除失效订阅者
    fn fan_out<F>(&self, message: &BusMessage, mut wants: F) -> usize
    where
        F: FnMut(&SubscriptionFilter) -> bool,
    {
        let mut delivered = 0usize;
        let mut dead: Vec<(SubscriberId, &'static str)> = Vec::new();

        {
            let slots = self.read_slots();
            for (id, slot) in slots.iter() {
                if slot.cancel.is_cancelled() {
                    dead.push((*id, "cancelled"));
                    continue;
                }
                if !wants(&slot.filter) {
                    continue;
                }
                match slot.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => dead.push((*id, "buffer_full")),
                    Err(TrySendError::Closed(_)) => dead.push((*id, "closed")),
                }
            }
        }

        if !dead.is_empty() {
            let mut slots = self.write_slots();
            for (id, reason) in dead {
                if let Some(slot) = slots.remove(&id) {
                    slot.cancel.cancel();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(subscriber_id = id, reason, "摘除订阅者");
                }
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

/// 总线运行统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped_subscribers: u64,
}

// ==========================================
// NotificationBus
// ==========================================
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl NotificationBus {
    /// 创建总线
    ///
    /// # 参数
    /// - buffer: 每个订阅者的缓冲条数, 写满视为慢订阅者
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// 注册订阅者
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let cancel = CancellationToken::new();

        self.inner.write_slots().insert(
            id,
            Slot {
                filter,
                tx,
                cancel: cancel.clone(),
            },
        );
        debug!(subscriber_id = id, "订阅者已注册");

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
            cancel,
        }
    }

    /// 注销订阅者; 返回是否存在
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(subscriber_id = id, "订阅者已注销");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.read_slots().len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            subscribers: self.subscriber_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped_subscribers: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// 发布变更事件, 返回投递到的订阅者数量
    pub fn publish_event(&self, event: ChangeEvent) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let (entity_type, entity_id, operation) =
            (event.entity_type, event.entity_id, event.operation);

        let message = BusMessage::Event(event);
        let delivered = self.inner.fan_out(&message, |filter| {
            message.as_event().map_or(false, |e| filter.matches(e))
        });
        debug!(%entity_type, entity_id, %operation, delivered, "变更事件已发布");
        delivered
    }

    /// 向所有订阅者发送一次心跳
    pub fn heartbeat(&self) -> usize {
        let message = BusMessage::Heartbeat { at: Utc::now() };
        self.inner.fan_out(&message, |_| true)
    }

    /// 心跳循环, 直到 shutdown 被触发
    pub async fn run_heartbeat(self, period: Duration, shutdown: CancellationToken) {
        info!(period_secs = period.as_secs(), "心跳循环启动");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 跳过立即触发的首个 tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("心跳循环退出");
                    break;
                }

                _ = interval.tick() => {
                    let reached = self.heartbeat();
                    debug!(reached, "心跳已发送");
                }
            }
        }
    }

    pub fn spawn_heartbeat(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_heartbeat(period, shutdown))
    }

    /// 从变更来源持续转发事件到总线
    ///
    /// 来源关闭或 shutdown 触发时返回, 返回值为转发的事件数
    pub async fn pump<S>(&self, mut source: S, shutdown: CancellationToken) -> u64
    where
        S: ChangeSource,
    {
        let mut forwarded = 0u64;
        info!(source = source.name(), "变更来源接入");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                next = source.next_change() => match next {
                    Some(event) => {
                        self.publish_event(event);
                        forwarded += 1;
                    }
                    None => {
                        info!(source = source.name(), "变更来源已关闭");
                        break;
                    }
                }
            }
        }

        forwarded
    }

    pub fn spawn_pump<S>(&self, source: S, shutdown: CancellationToken) -> JoinHandle<u64>
    where
        S: ChangeSource + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move { bus.pump(source, shutdown).await })
    }
}

impl ChangePublisher for NotificationBus {
    fn publish(&self, event: ChangeEvent) -> usize {
        self.publish_event(event)
    }
}

// ==========================================
// Subscription
// ==========================================

/// 订阅句柄
///
/// drop 即注销; 被总线摘除后 recv 返回 None, 需重新订阅并重新拉取当前状态
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<BusMessage>,
    bus: Weak<BusInner>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// 接收下一条消息（事件或心跳）
    pub async fn recv(&mut self) -> Option<BusMessage> {
        if self.cancel.is_cancelled() {
            self.detach();
            return None;
        }
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                self.detach();
                None
            }

            message = self.rx.recv() => message,
        }
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// 接收下一条变更事件, 跳过心跳
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.recv().await? {
                BusMessage::Event(event) => return Some(event),
                BusMessage::Heartbeat { .. } => continue,
            }
        }
    }

    /// 取消令牌: 客户端断开时触发即注销
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 是否已被注销或摘除
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = BusMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            this.detach();
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
