//! 事件数据结构
//!
//! 定义事件发布订阅系统的事件、过滤器和控制器内置事件名称。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::utils::generate_uuid;

/// 控制器自身作为事件来源时使用的名称
pub const CORE_SOURCE: &str = "core";

/// 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub event_id: String,

    /// 事件类型（格式: category.name，如 core.instanceCreated）
    pub event_type: String,

    /// 发送方
    pub source: String,

    /// 事件数据
    #[serde(default)]
    pub data: Value,

    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建新事件
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: generate_uuid(),
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// 创建由控制器发出的事件
    pub fn core(event_type: impl Into<String>, data: Value) -> Self {
        Self::new(event_type, CORE_SOURCE, data)
    }

    /// 事件数据中携带的实例 ID（`core.instance*` 事件）
    pub fn instance_id(&self) -> Option<u64> {
        self.data.get("instanceId").and_then(Value::as_u64)
    }
}

/// 事件过滤器
///
/// 在事件类型匹配之后再按发送方和数据字段过滤。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 发送方过滤
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// 数据字段过滤（顶层字段等值匹配）
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data_filters: HashMap<String, Value>,
}

impl EventFilter {
    /// 创建空过滤器（匹配所有）
    pub fn new() -> Self {
        Self::default()
    }

    /// 按发送方过滤
    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            data_filters: HashMap::new(),
        }
    }

    /// 添加数据字段过滤
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data_filters.insert(key.into(), value);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref source) = self.source {
            if source != &event.source {
                return false;
            }
        }

        self.data_filters
            .iter()
            .all(|(key, expected)| event.data.get(key) == Some(expected))
    }
}

/// 匹配事件类型模式
///
/// 支持 `*`（所有事件）和 `prefix.*`（该前缀下的所有事件）。
pub fn matches_pattern(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type.len() > prefix.len() + 1
            && event_type.starts_with(prefix)
            && event_type.as_bytes()[prefix.len()] == b'.';
    }

    pattern == event_type
}

/// 控制器内置事件类型
pub mod core_events {
    /// 控制器初始化完成
    pub const INIT: &str = "core.init";
    /// 控制器启动完成
    pub const START: &str = "core.start";
    /// 控制器已停止
    pub const STOP: &str = "core.stop";
    /// 实例记录已创建
    pub const INSTANCE_CREATED: &str = "core.instanceCreated";
    /// 实例已注册为运行中
    pub const INSTANCE_REGISTERED: &str = "core.instanceRegistered";
    /// 实例已重新配置
    pub const INSTANCE_RECONFIGURED: &str = "core.instanceReconfigured";
    /// 实例已停止
    pub const INSTANCE_STOPPED: &str = "core.instanceStopped";
    /// 实例记录已删除
    pub const INSTANCE_DELETED: &str = "core.instanceDeleted";
    /// 错误
    pub const ERROR: &str = "core.error";
    /// 新通知
    pub const NOTIFICATION_PUSH: &str = "notifications.push";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::core(core_events::INSTANCE_CREATED, json!({"instanceId": 3}));

        assert!(!event.event_id.is_empty());
        assert_eq!(event.event_type, "core.instanceCreated");
        assert_eq!(event.source, CORE_SOURCE);
        assert_eq!(event.instance_id(), Some(3));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*", "core.init"));
        assert!(matches_pattern("core.*", "core.instanceCreated"));
        assert!(!matches_pattern("core.*", "core"));
        assert!(!matches_pattern("core.*", "corexyz.init"));
        assert!(!matches_pattern("core.*", "notifications.push"));
        assert!(matches_pattern("core.init", "core.init"));
        assert!(!matches_pattern("core.init", "core.initialized"));
    }

    #[test]
    fn test_event_filter_source() {
        let filter = EventFilter::by_source("zwave");

        let event1 = Event::new("device.added", "zwave", json!({}));
        let event2 = Event::new("device.added", "enocean", json!({}));

        assert!(filter.matches(&event1));
        assert!(!filter.matches(&event2));
    }

    #[test]
    fn test_event_filter_data() {
        let filter = EventFilter::new().with_data("instanceId", json!(7));

        assert!(filter.matches(&Event::core("core.instanceStopped", json!({"instanceId": 7}))));
        assert!(!filter.matches(&Event::core("core.instanceStopped", json!({"instanceId": 8}))));
        assert!(!filter.matches(&Event::core("core.instanceStopped", json!({}))));
    }
}
