//! 实例数据模型
//!
//! - [`InstanceRecord`]: 持久化的实例配置记录
//! - [`InstanceUpdate`]: 重新配置请求
//! - [`LiveInstance`]: 运行中的实例对象
//! - [`InstanceState`]: 实例的可观察状态

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::runtime::ModuleInstance;

/// 实例 ID
pub type InstanceId = u64;

/// 实例参数
pub type InstanceParams = Map<String, Value>;

/// 启用状态值
pub const STATUS_ENABLE: &str = "enable";

/// 参数中表示状态的键
pub const STATUS_KEY: &str = "status";

/// 持久化的实例记录
///
/// 记录在创建后一直保留，直到被显式删除。模块 ID 可能指向未知模块，
/// 这种情况在实例化时作为错误报告。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    /// 实例 ID
    pub id: InstanceId,

    /// 所属模块 ID
    pub module_id: String,

    /// 实例参数
    #[serde(default)]
    pub params: InstanceParams,
}

impl InstanceRecord {
    /// 创建实例记录
    pub fn new(id: InstanceId, module_id: impl Into<String>, params: InstanceParams) -> Self {
        Self {
            id,
            module_id: module_id.into(),
            params,
        }
    }

    /// `params.status` 的值（非字符串视为缺失）
    pub fn status(&self) -> Option<&str> {
        self.params.get(STATUS_KEY).and_then(Value::as_str)
    }

    /// 是否启用：`params.status` 缺失或为 `"enable"`
    pub fn is_enabled(&self) -> bool {
        match self.params.get(STATUS_KEY) {
            None => true,
            Some(value) => value.as_str() == Some(STATUS_ENABLE),
        }
    }
}

/// 重新配置请求
///
/// 有效状态取 `status`，缺失时取 `params.status`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    /// 目标状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// 新参数，存在时替换记录中的参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<InstanceParams>,
}

impl InstanceUpdate {
    /// 启用实例
    pub fn enable() -> Self {
        Self::with_status(STATUS_ENABLE)
    }

    /// 设置目标状态
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            params: None,
        }
    }

    /// 附带新参数
    pub fn params(mut self, params: InstanceParams) -> Self {
        self.params = Some(params);
        self
    }

    /// 有效状态
    pub fn effective_status(&self) -> Option<&str> {
        self.status.as_deref().or_else(|| {
            self.params
                .as_ref()
                .and_then(|p| p.get(STATUS_KEY))
                .and_then(Value::as_str)
        })
    }

    /// 有效状态是否为 `"enable"`
    pub fn is_enable(&self) -> bool {
        self.effective_status() == Some(STATUS_ENABLE)
    }

    /// 把请求应用到记录上
    ///
    /// 只有请求带 `params` 时才替换记录参数，单独的 `status` 不改动持久化的参数。
    pub fn apply_to(&self, record: &mut InstanceRecord) {
        if let Some(ref params) = self.params {
            record.params = params.clone();
        }
    }

    /// 传给模块 `init` / `save_new_config` 的参数
    ///
    /// 以请求参数（或记录现有参数）为底，显式给出的 `status` 覆盖其中的 `status`。
    pub fn effective_params(&self, record: &InstanceRecord) -> InstanceParams {
        let mut params = self.params.clone().unwrap_or_else(|| record.params.clone());
        if let Some(ref status) = self.status {
            params.insert(STATUS_KEY.to_string(), Value::String(status.clone()));
        }
        params
    }
}

/// 实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// 只有记录，未运行
    Defined,
    /// 已构造但尚未初始化（只在实例化过程中短暂存在）
    Instantiated,
    /// 运行中
    Running,
    /// 已停止，记录保留
    Stopped,
    /// 记录已删除
    Removed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Defined => "defined",
            InstanceState::Instantiated => "instantiated",
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
            InstanceState::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// 运行中的实例
pub struct LiveInstance {
    /// 实例 ID
    pub id: InstanceId,
    /// 所属模块 ID
    pub module_id: String,
    /// 所属模块是否为单例
    pub singleton: bool,
    /// 启动时间
    pub started_at: DateTime<Utc>,
    /// 模块提供的实例对象
    pub handle: Box<dyn ModuleInstance>,
}

impl fmt::Debug for LiveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveInstance")
            .field("id", &self.id)
            .field("module_id", &self.module_id)
            .field("singleton", &self.singleton)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> InstanceParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_enabled_rules() {
        assert!(InstanceRecord::new(1, "a", InstanceParams::new()).is_enabled());
        assert!(InstanceRecord::new(1, "a", params(json!({"status": "enable"}))).is_enabled());
        assert!(!InstanceRecord::new(1, "a", params(json!({"status": "disable"}))).is_enabled());
        assert!(!InstanceRecord::new(1, "a", params(json!({"status": true}))).is_enabled());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = InstanceRecord::new(3, "zwave", params(json!({"port": "/dev/ttyS0"})));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["moduleId"], "zwave");
        assert_eq!(value["params"]["port"], "/dev/ttyS0");

        let parsed: InstanceRecord = serde_json::from_value(json!({"id": 4, "moduleId": "x"})).unwrap();
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_update_effective_status() {
        assert!(InstanceUpdate::enable().is_enable());

        let from_params = InstanceUpdate::default().params(params(json!({"status": "enable"})));
        assert!(from_params.is_enable());

        let explicit_wins = InstanceUpdate::with_status("disable").params(params(json!({"status": "enable"})));
        assert_eq!(explicit_wins.effective_status(), Some("disable"));

        assert_eq!(InstanceUpdate::default().effective_status(), None);
    }

    #[test]
    fn test_update_apply_to_record() {
        let mut record = InstanceRecord::new(1, "a", params(json!({"x": 1, "status": "enable"})));

        // 只带状态时不改动持久化参数
        let disable = InstanceUpdate::with_status("disable");
        disable.apply_to(&mut record);
        assert_eq!(record.params, params(json!({"x": 1, "status": "enable"})));

        let hook_params = disable.effective_params(&record);
        assert_eq!(hook_params["x"], 1);
        assert_eq!(hook_params["status"], "disable");

        InstanceUpdate::default()
            .params(params(json!({"y": 2})))
            .apply_to(&mut record);
        assert!(!record.params.contains_key("x"));
        assert_eq!(record.params["y"], 2);
        assert!(record.is_enabled());
    }
}
