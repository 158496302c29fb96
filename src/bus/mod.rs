//! 通知与事件总线
//!
//! - [`EventBus`]: 发布订阅通道
//! - [`NotificationCenter`]: 只追加的通知日志

pub mod event;
pub mod event_bus;
pub mod notification;

pub use event::{core_events, matches_pattern, Event, EventFilter, CORE_SOURCE};
pub use event_bus::{DispatchStats, EventBus, EventBusConfig, EventCallback};
pub use notification::{
    Notification, NotificationCenter, NotificationLevel, CORE_CATEGORY, DEFAULT_CATEGORY,
    NOTIFICATIONS_KEY,
};
