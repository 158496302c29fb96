//! 事件总线
//!
//! 控制器与模块之间的发布订阅通道。
//!
//! # 主要功能
//!
//! - **事件订阅**: 按事件类型模式订阅（支持 `*` 和 `prefix.*`），可附加过滤器
//! - **订阅者隔离**: 回调 panic 或超时不影响其他订阅者，也不影响发布方
//! - **分发模式**: 默认顺序分发，订阅者按订阅顺序、按发布顺序收到事件；
//!   也可切换为并发分发
//!
//! # 使用示例
//!
//! ```ignore
//! use automation_core::bus::{EventBus, Event};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let id = bus
//!     .subscribe("logger", "core.*", None, Arc::new(|event| {
//!         println!("收到事件: {}", event.event_type);
//!     }))
//!     .await?;
//!
//! bus.publish(Event::core("core.start", serde_json::Value::Null)).await;
//! bus.unsubscribe(&id).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::event::{matches_pattern, Event, EventFilter};
use crate::core::config::EventConfig;
use crate::utils::{generate_id, CoreError, Result};

/// 事件回调函数类型
///
/// 回调在阻塞线程池中执行，必须是线程安全的。
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    subscription_id: String,
    subscriber_id: String,
    pattern: String,
    filter: Option<EventFilter>,
    callback: EventCallback,
}

impl SubscriptionEntry {
    fn matches(&self, event: &Event) -> bool {
        matches_pattern(&self.pattern, &event.event_type)
            && self.filter.as_ref().map_or(true, |f| f.matches(event))
    }
}

/// 分发统计信息
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// 总分发次数
    pub total_dispatched: u64,
    /// 成功分发次数
    pub successful: u64,
    /// 失败分发次数（回调 panic）
    pub failed: u64,
    /// 超时次数
    pub timeouts: u64,
    /// 最后分发时间
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

impl DispatchStats {
    fn record(&mut self, result: &DispatchResult) {
        self.total_dispatched += 1;
        self.last_dispatch_at = Some(Utc::now());
        match result {
            DispatchResult::Success => self.successful += 1,
            DispatchResult::Failed(_) => self.failed += 1,
            DispatchResult::Timeout => self.timeouts += 1,
        }
    }
}

/// 事件总线配置
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// 订阅者处理超时时间
    pub handler_timeout: Duration,
    /// 是否启用并发分发
    pub concurrent_dispatch: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::from_event_config(&EventConfig::default())
    }
}

impl EventBusConfig {
    /// 从内核配置的事件段创建
    pub fn from_event_config(config: &EventConfig) -> Self {
        Self {
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
            concurrent_dispatch: config.concurrent_dispatch,
        }
    }
}

/// 分发结果
#[derive(Debug, Clone)]
enum DispatchResult {
    Success,
    Failed(String),
    Timeout,
}

/// 事件总线
///
/// 克隆得到的是同一条总线的句柄。
#[derive(Clone)]
pub struct EventBus {
    /// 订阅列表，保持订阅顺序
    subscriptions: Arc<RwLock<Vec<SubscriptionEntry>>>,
    stats: Arc<RwLock<DispatchStats>>,
    config: EventBusConfig,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 使用自定义配置创建事件总线
    pub fn with_config(config: EventBusConfig) -> Self {
        debug!(
            "创建事件总线: timeout={:?}, concurrent={}",
            config.handler_timeout, config.concurrent_dispatch
        );
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            config,
        }
    }

    /// 订阅事件
    ///
    /// # 参数
    ///
    /// * `subscriber_id` - 订阅者标识（用于日志）
    /// * `pattern` - 事件类型模式，支持 `*` 与 `prefix.*`
    /// * `filter` - 可选的事件过滤器
    /// * `callback` - 事件回调函数
    ///
    /// # 返回
    ///
    /// 订阅 ID，用于取消订阅
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
        filter: Option<EventFilter>,
        callback: EventCallback,
    ) -> Result<String> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "pattern".to_string(),
                reason: "事件类型模式不能为空".to_string(),
            });
        }

        let entry = SubscriptionEntry {
            subscription_id: generate_id(),
            subscriber_id: subscriber_id.into(),
            pattern,
            filter,
            callback,
        };
        let subscription_id = entry.subscription_id.clone();

        info!(
            subscription_id = %subscription_id,
            subscriber_id = %entry.subscriber_id,
            pattern = %entry.pattern,
            "事件订阅成功"
        );
        self.subscriptions.write().await.push(entry);

        Ok(subscription_id)
    }

    /// 取消订阅
    ///
    /// # 错误
    ///
    /// 订阅不存在时返回 `CoreError::SubscriptionNotFound`
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let position = subscriptions
            .iter()
            .position(|s| s.subscription_id == subscription_id)
            .ok_or_else(|| CoreError::SubscriptionNotFound(subscription_id.to_string()))?;
        let removed = subscriptions.remove(position);

        info!(
            subscription_id = %subscription_id,
            subscriber_id = %removed.subscriber_id,
            "取消订阅成功"
        );
        Ok(())
    }

    /// 发布事件
    ///
    /// 顺序模式下等待所有回调执行完毕（或超时）后返回；并发模式下
    /// 回调在后台任务中执行。订阅者的失败只记录日志，从不返回给发布方。
    ///
    /// # 返回
    ///
    /// 匹配的订阅者数量
    pub async fn publish(&self, event: Event) -> usize {
        let matching = self.find_matching_subscriptions(&event).await;
        trace!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            source = %event.source,
            subscribers = matching.len(),
            "发布事件"
        );

        let count = matching.len();
        if count == 0 {
            return 0;
        }

        if self.config.concurrent_dispatch {
            self.dispatch_concurrent(event, matching);
        } else {
            self.dispatch_sequential(event, matching).await;
        }

        count
    }

    /// 发布事件并等待所有回调完成
    ///
    /// 回调并发执行。返回 `(成功数, 失败数, 超时数)`。
    pub async fn publish_sync(&self, event: Event) -> (usize, usize, usize) {
        let matching = self.find_matching_subscriptions(&event).await;
        if matching.is_empty() {
            return (0, 0, 0);
        }

        let timeout_duration = self.config.handler_timeout;
        let tasks = matching.into_iter().map(|sub| {
            let event = event.clone();
            async move {
                let result =
                    Self::invoke_callback_with_timeout(sub.callback, event, timeout_duration).await;
                Self::log_result(&sub.subscription_id, &result);
                result
            }
        });
        let results = futures::future::join_all(tasks).await;

        let mut counts = (0, 0, 0);
        let mut stats = self.stats.write().await;
        for result in &results {
            stats.record(result);
            match result {
                DispatchResult::Success => counts.0 += 1,
                DispatchResult::Failed(_) => counts.1 += 1,
                DispatchResult::Timeout => counts.2 += 1,
            }
        }
        counts
    }

    async fn find_matching_subscriptions(&self, event: &Event) -> Vec<SubscriptionEntry> {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.matches(event))
            .cloned()
            .collect()
    }

    async fn dispatch_sequential(&self, event: Event, subscriptions: Vec<SubscriptionEntry>) {
        for sub in subscriptions {
            let result = Self::invoke_callback_with_timeout(
                sub.callback.clone(),
                event.clone(),
                self.config.handler_timeout,
            )
            .await;
            Self::log_result(&sub.subscription_id, &result);
            self.stats.write().await.record(&result);
        }
    }

    fn dispatch_concurrent(&self, event: Event, subscriptions: Vec<SubscriptionEntry>) {
        for sub in subscriptions {
            let event = event.clone();
            let timeout_duration = self.config.handler_timeout;
            let stats = self.stats.clone();

            tokio::spawn(async move {
                let result =
                    Self::invoke_callback_with_timeout(sub.callback, event, timeout_duration).await;
                Self::log_result(&sub.subscription_id, &result);
                stats.write().await.record(&result);
            });
        }
    }

    /// 带超时的回调调用
    ///
    /// 回调是同步函数，放到 `spawn_blocking` 线程中执行并捕获 panic。
    /// 超时后不再等待回调结果，回调本身可能仍在运行。
    async fn invoke_callback_with_timeout(
        callback: EventCallback,
        event: Event,
        timeout_duration: Duration,
    ) -> DispatchResult {
        let result = timeout(
            timeout_duration,
            tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback(event)))
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok(()))) => DispatchResult::Success,
            Ok(Ok(Err(_))) => DispatchResult::Failed("回调函数 panic".to_string()),
            Ok(Err(e)) => DispatchResult::Failed(format!("任务执行失败: {}", e)),
            Err(_) => DispatchResult::Timeout,
        }
    }

    fn log_result(subscription_id: &str, result: &DispatchResult) {
        match result {
            DispatchResult::Success => trace!(subscription_id = %subscription_id, "事件处理成功"),
            DispatchResult::Failed(e) => {
                warn!(subscription_id = %subscription_id, error = %e, "事件处理失败")
            }
            DispatchResult::Timeout => warn!(subscription_id = %subscription_id, "事件处理超时"),
        }
    }

    /// 当前订阅数量
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 获取分发统计信息
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter_callback(counter: Arc<AtomicUsize>) -> EventCallback {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let id = bus
            .subscribe("test", "core.init", None, Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(bus.subscription_count().await, 1);

        bus.unsubscribe(&id).await.unwrap();
        assert_eq!(bus.subscription_count().await, 0);

        let result = bus.unsubscribe(&id).await;
        assert!(matches!(result, Err(CoreError::SubscriptionNotFound(_))));
    }

    #[tokio::test]
    async fn test_sequential_publish_delivers_before_return() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("test", "core.start", None, counter_callback(counter.clone()))
            .await
            .unwrap();

        let delivered = bus.publish(Event::core("core.start", json!(null))).await;
        assert_eq!(delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert_eq!(bus.publish(Event::core("core.stop", json!(null))).await, 0);
    }

    #[tokio::test]
    async fn test_wildcard_matched_once() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("all", "*", None, counter_callback(counter.clone()))
            .await
            .unwrap();

        bus.publish(Event::core("core.init", json!(null))).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_order_preserved() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(name, "core.*", None, Arc::new(move |_| seen.lock().unwrap().push(name)))
                .await
                .unwrap();
        }

        bus.publish(Event::core("core.init", json!(null))).await;
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_subscriber_isolation() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe("bad", "core.error", None, Arc::new(|_| panic!("subscriber failure")))
            .await
            .unwrap();
        bus.subscribe("good", "core.error", None, counter_callback(counter.clone()))
            .await
            .unwrap();

        let delivered = bus.publish(Event::core("core.error", json!({}))).await;
        assert_eq!(delivered, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = bus.stats().await;
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let bus = EventBus::with_config(EventBusConfig {
            handler_timeout: Duration::from_millis(50),
            concurrent_dispatch: false,
        });
        bus.subscribe(
            "slow",
            "core.init",
            None,
            Arc::new(|_| std::thread::sleep(Duration::from_millis(300))),
        )
        .await
        .unwrap();

        let (ok, failed, timeouts) = bus.publish_sync(Event::core("core.init", json!(null))).await;
        assert_eq!((ok, failed, timeouts), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_filter_by_data() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "watcher",
            "core.*",
            Some(EventFilter::new().with_data("instanceId", json!(2))),
            counter_callback(counter.clone()),
        )
        .await
        .unwrap();

        bus.publish(Event::core("core.instanceStopped", json!({"instanceId": 1}))).await;
        bus.publish(Event::core("core.instanceStopped", json!({"instanceId": 2}))).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_eventually_delivers() {
        let bus = EventBus::with_config(EventBusConfig {
            handler_timeout: Duration::from_secs(1),
            concurrent_dispatch: true,
        });
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("c", "*", None, counter_callback(counter.clone()))
            .await
            .unwrap();

        for _ in 0..5 {
            bus.publish(Event::core("core.init", json!(null))).await;
        }
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
