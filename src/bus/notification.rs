//! 通知中心
//!
//! 进程级的只追加通知日志。每条通知在追加后持久化，并以
//! `notifications.push` 事件广播；只有 `redeemed` 标记可以修改。
//! 内核在激活边界捕获的错误也通过这里转换为通知和 `core.error` 事件。

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::event::{core_events, Event};
use super::event_bus::EventBus;
use crate::storage::Storage;
use crate::utils::{CoreError, Result, TimestampIdGenerator};

/// 通知的存储键
pub const NOTIFICATIONS_KEY: &str = "notifications";

/// 未指定类别时使用的默认类别
pub const DEFAULT_CATEGORY: &str = "device";

/// 内核自身产生的通知类别
pub const CORE_CATEGORY: &str = "core";

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 毫秒时间戳派生的 ID，严格递增
    pub id: i64,
    /// ISO-8601 时间
    pub timestamp: String,
    /// 级别
    pub level: NotificationLevel,
    /// 消息
    pub message: String,
    /// 类别
    #[serde(rename = "type")]
    pub category: String,
    /// 是否已处理
    #[serde(default)]
    pub redeemed: bool,
}

/// 通知中心
pub struct NotificationCenter {
    storage: Arc<dyn Storage>,
    bus: EventBus,
    entries: RwLock<Vec<Notification>>,
    ids: TimestampIdGenerator,
}

impl NotificationCenter {
    pub fn new(storage: Arc<dyn Storage>, bus: EventBus) -> Self {
        Self {
            storage,
            bus,
            entries: RwLock::new(Vec::new()),
            ids: TimestampIdGenerator::new(),
        }
    }

    /// 从存储恢复通知，返回恢复的条数
    ///
    /// 之后生成的 ID 都大于已恢复的最大 ID。
    pub async fn load(&self) -> Result<usize> {
        let loaded: Vec<Notification> = match self.storage.load(NOTIFICATIONS_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| CoreError::persistence(NOTIFICATIONS_KEY, e))?,
            None => Vec::new(),
        };

        if let Some(max_id) = loaded.iter().map(|n| n.id).max() {
            self.ids.observe(max_id);
        }

        let count = loaded.len();
        *self.entries.write().await = loaded;
        info!(count = count, "已加载通知");
        Ok(count)
    }

    /// 追加一条通知
    ///
    /// 追加后立即持久化全部通知，成功后发布 `notifications.push`。
    ///
    /// # 错误
    ///
    /// 持久化失败时返回 `CoreError::Persistence`，通知仍保留在内存中。
    pub async fn add(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        category: impl Into<String>,
    ) -> Result<Notification> {
        let notification = {
            let mut entries = self.entries.write().await;
            let id = self.ids.next_id();
            let notification = Notification {
                id,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                level,
                message: message.into(),
                category: category.into(),
                redeemed: false,
            };
            entries.push(notification.clone());
            self.persist(&entries).await?;
            notification
        };

        match level {
            NotificationLevel::Error => error!(
                notification_id = notification.id,
                category = %notification.category,
                "{}", notification.message
            ),
            NotificationLevel::Warning => warn!(
                notification_id = notification.id,
                category = %notification.category,
                "{}", notification.message
            ),
            NotificationLevel::Info => info!(
                notification_id = notification.id,
                category = %notification.category,
                "{}", notification.message
            ),
        }

        let data = serde_json::to_value(&notification)?;
        self.bus
            .publish(Event::core(core_events::NOTIFICATION_PUSH, data))
            .await;

        Ok(notification)
    }

    /// 报告在激活边界捕获的错误
    ///
    /// 先发布 `core.error`（载荷带级别），再按错误的级别追加通知。
    /// 通知持久化失败只记录日志，不向调用方传播。
    pub async fn report(&self, err: &CoreError, category: &str) {
        let level = err.severity();
        let event = Event::core(
            core_events::ERROR,
            json!({
                "code": err.error_code(),
                "message": err.to_string(),
                "level": level,
                "category": category,
            }),
        );
        self.bus.publish(event).await;

        if let Err(persist_err) = self.add(level, err.to_string(), category).await {
            error!(
                error_code = err.error_code(),
                error = %persist_err,
                "无法保存错误通知"
            );
        }
    }

    /// 列出 ID 不小于 `since` 的通知
    ///
    /// `redeemed` 为 `Some` 时只返回标记相符的通知。
    pub async fn list(&self, since: i64, redeemed: Option<bool>) -> Vec<Notification> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|n| n.id >= since && redeemed.map_or(true, |r| n.redeemed == r))
            .cloned()
            .collect()
    }

    /// 获取单条通知
    pub async fn get(&self, id: i64) -> Result<Notification> {
        self.entries
            .read()
            .await
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or(CoreError::NotificationNotFound(id))
    }

    /// 修改单条通知的 `redeemed` 标记
    pub async fn set_redeemed(&self, id: i64, redeemed: bool) -> Result<Notification> {
        let mut entries = self.entries.write().await;
        let notification = entries
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(CoreError::NotificationNotFound(id))?;
        notification.redeemed = redeemed;
        let updated = notification.clone();
        self.persist(&entries).await?;
        Ok(updated)
    }

    /// 把一组通知标记为已处理，返回实际标记的条数
    pub async fn redeem(&self, ids: &[i64]) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let mut count = 0;
        for notification in entries.iter_mut().filter(|n| ids.contains(&n.id)) {
            notification.redeemed = true;
            count += 1;
        }
        self.persist(&entries).await?;
        Ok(count)
    }

    /// 删除一组通知，返回删除的条数
    pub async fn delete(&self, ids: &[i64]) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|n| !ids.contains(&n.id));
        let count = before - entries.len();
        self.persist(&entries).await?;
        Ok(count)
    }

    /// 通知总数
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 是否没有任何通知
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, entries: &[Notification]) -> Result<()> {
        let value = serde_json::to_value(entries)
            .map_err(|e| CoreError::persistence(NOTIFICATIONS_KEY, e))?;
        self.storage.save(NOTIFICATIONS_KEY, &value).await
    }
}
