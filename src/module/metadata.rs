//! 模块元数据定义
//!
//! 定义模块描述文件（`module.json` / `module.yaml`）的数据结构，
//! 以及注册表中保存的模块描述符和加载状态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::runtime::ModuleFactory;

/// 模块元数据
///
/// 对应模块目录下的描述文件。`id` 可以省略，省略时取目录名。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// 模块唯一标识
    #[serde(default)]
    pub id: String,

    /// 依赖的模块 ID，按声明顺序加载
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// 是否为单例模块（同一时间最多一个运行中的实例）
    #[serde(default)]
    pub singleton: bool,

    /// 是否跳过（登记但从不激活）
    #[serde(default)]
    pub skip: bool,

    /// 模块版本（semver 格式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// 显示名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// 模块描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 作者
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// 其他字段，原样保留给模块使用
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ModuleMetadata {
    /// 创建最小元数据
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// 设置依赖
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// 标记为单例
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// 标记为跳过
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// 模块加载状态
///
/// 状态单调推进：`Discovered → Loading → {Loaded, Failed}`，
/// 另外允许 `Discovered → Failed`（加载前即发现错误）。
/// `Loaded` 与 `Failed` 是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// 已发现，尚未加载
    Discovered,
    /// 正在加载（处于当前依赖路径上）
    Loading,
    /// 已加载
    Loaded,
    /// 加载失败，不再重试
    Failed,
}

impl LoadState {
    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, target: LoadState) -> bool {
        matches!(
            (self, target),
            (LoadState::Discovered, LoadState::Loading)
                | (LoadState::Discovered, LoadState::Failed)
                | (LoadState::Loading, LoadState::Loaded)
                | (LoadState::Loading, LoadState::Failed)
        )
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Discovered => "discovered",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 模块描述符
///
/// 注册表中每个模块一条。加载状态和激活得到的工厂只由依赖加载器修改。
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// 元数据
    pub metadata: ModuleMetadata,

    /// 模块所在目录
    pub location: PathBuf,

    /// 加载状态
    pub load_state: LoadState,

    /// 激活后得到的实例工厂
    pub factory: Option<Arc<dyn ModuleFactory>>,

    /// 发现时间
    pub discovered_at: DateTime<Utc>,

    /// 最近一次加载错误
    pub last_error: Option<String>,
}

impl ModuleDescriptor {
    /// 创建新的描述符
    pub fn new(metadata: ModuleMetadata, location: impl Into<PathBuf>) -> Self {
        Self {
            metadata,
            location: location.into(),
            load_state: LoadState::Discovered,
            factory: None,
            discovered_at: Utc::now(),
            last_error: None,
        }
    }

    /// 模块 ID
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// 依赖列表
    pub fn dependencies(&self) -> &[String] {
        &self.metadata.dependencies
    }

    /// 是否为单例
    pub fn is_singleton(&self) -> bool {
        self.metadata.singleton
    }

    /// 是否跳过激活
    pub fn is_skipped(&self) -> bool {
        self.metadata.skip
    }

    /// 是否已加载
    pub fn is_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.metadata.id)
            .field("location", &self.location)
            .field("load_state", &self.load_state)
            .field("activated", &self.factory.is_some())
            .field("last_error", &self.last_error)
            .finish()
    }
}
