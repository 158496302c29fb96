//! 内核配置
//!
//! 定义控制器内核的配置结构和加载逻辑。所有配置段都带有默认值，
//! 配置文件中缺失的字段会回退为默认值。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略（never / hourly / daily）
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块目录列表，按顺序扫描（系统模块在前，用户模块在后）
    #[serde(default = "default_module_dirs")]
    pub module_dirs: Vec<PathBuf>,
}

fn default_module_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("modules"), PathBuf::from("userModules")]
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_dirs: default_module_dirs(),
        }
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 数据目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./storage")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 单个订阅回调的超时时间（毫秒）
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// 是否并发分发事件
    ///
    /// 默认顺序分发，保证同一订阅者按发布顺序收到生命周期事件。
    #[serde(default)]
    pub concurrent_dispatch: bool,
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout_ms(),
            concurrent_dispatch: false,
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块发现配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 持久化配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 事件总线配置
    #[serde(default)]
    pub events: EventConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: CoreConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.modules.module_dirs.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "modules.module_dirs".to_string(),
                reason: "至少需要一个模块目录".to_string(),
            });
        }
        if self.events.handler_timeout_ms == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "events.handler_timeout_ms".to_string(),
                reason: "超时时间必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: CoreConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }
        if other.modules.module_dirs != default_module_dirs() {
            self.modules.module_dirs = other.modules.module_dirs;
        }
        if other.storage.data_dir != default_data_dir() {
            self.storage.data_dir = other.storage.data_dir;
        }
        if other.events.handler_timeout_ms != default_handler_timeout_ms() {
            self.events.handler_timeout_ms = other.events.handler_timeout_ms;
        }
        if other.events.concurrent_dispatch {
            self.events.concurrent_dispatch = true;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 替换模块目录列表
    pub fn module_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.modules.module_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// 设置数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.data_dir = dir.into();
        self
    }

    /// 设置事件回调超时
    pub fn handler_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.events.handler_timeout_ms = timeout_ms;
        self
    }

    /// 启用并发事件分发
    pub fn concurrent_dispatch(mut self) -> Self {
        self.config.events.concurrent_dispatch = true;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}
