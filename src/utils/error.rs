//! 自动化内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。模块与实例激活过程中的错误
//! 会在发生处被转换为通知，只有持久化失败被视为致命错误向上传播。

use thiserror::Error;

use crate::bus::notification::NotificationLevel;
use crate::module::instance::InstanceId;

/// 自动化内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块元数据与注册错误 ====================

    /// 模块 ID 重复注册
    #[error("模块已注册: '{0}'")]
    DuplicateModule(String),

    /// 模块元数据不可读或无效
    #[error("无效的模块元数据 '{module_id}': {reason}")]
    ModuleMetadata {
        module_id: String,
        reason: String,
    },

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    // ==================== 依赖加载错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    /// 依赖模块缺失
    #[error("模块 '{module}' 的依赖 '{dependency}' 未找到")]
    DependencyMissing {
        module: String,
        dependency: String,
    },

    /// 依赖模块已加载但没有可用实例
    #[error("模块 '{module}' 加载失败: 依赖 '{dependency}' {reason}")]
    DependencyUnavailable {
        module: String,
        dependency: String,
        reason: String,
    },

    /// 模块激活失败
    #[error("模块激活失败: '{module_id}' - {reason}")]
    ModuleActivation {
        module_id: String,
        reason: String,
    },

    /// 非法的加载状态转换
    #[error("模块 '{module_id}' 的加载状态不能从 {from} 转换为 {to}")]
    InvalidStateTransition {
        module_id: String,
        from: String,
        to: String,
    },

    // ==================== 实例生命周期错误 ====================

    /// 实例构造失败
    #[error("无法实例化模块 '{module_id}' (实例 {instance_id}): {reason}")]
    InstanceConstruction {
        instance_id: InstanceId,
        module_id: String,
        reason: String,
    },

    /// 实例初始化失败
    #[error("无法初始化模块 '{module_id}' (实例 {instance_id}): {reason}")]
    InstanceInit {
        instance_id: InstanceId,
        module_id: String,
        reason: String,
    },

    /// 实例停止失败
    #[error("无法停止模块 '{module_id}' (实例 {instance_id}): {reason}")]
    InstanceStop {
        instance_id: InstanceId,
        module_id: String,
        reason: String,
    },

    /// 单例模块已有活动实例
    #[error("模块 '{module_id}' 是单例模块且已被实例化，跳过实例 {instance_id}")]
    SingletonConflict {
        instance_id: InstanceId,
        module_id: String,
    },

    /// 同一实例 ID 重复注册
    #[error("不能重复注册模块实例 {0}")]
    DuplicateInstance(InstanceId),

    /// 实例未找到
    #[error("实例未找到: {0}")]
    InstanceNotFound(InstanceId),

    // ==================== 持久化与配置错误 ====================

    /// 持久化服务不可用
    #[error("持久化失败 '{key}': {reason}")]
    Persistence {
        key: String,
        reason: String,
    },

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== 事件与通知错误 ====================

    /// 事件发布失败
    #[error("事件发布失败: {0}")]
    EventPublishFailed(String),

    /// 订阅未找到
    #[error("订阅未找到: '{0}'")]
    SubscriptionNotFound(String),

    /// 通知未找到
    #[error("通知未找到: {0}")]
    NotificationNotFound(i64),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 控制器状态不允许该操作
    #[error("控制器状态无效: {0}")]
    InvalidState(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_DUPLICATE: &str = "MODULE-001";
    pub const MODULE_METADATA: &str = "MODULE-002";
    pub const MODULE_NOT_FOUND: &str = "MODULE-003";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-004";
    pub const MODULE_DEPENDENCY_MISSING: &str = "MODULE-005";
    pub const MODULE_DEPENDENCY_UNAVAILABLE: &str = "MODULE-006";
    pub const MODULE_ACTIVATION: &str = "MODULE-007";
    pub const MODULE_STATE_TRANSITION: &str = "MODULE-008";

    // 实例错误 (INSTANCE-xxx)
    pub const INSTANCE_CONSTRUCTION: &str = "INSTANCE-001";
    pub const INSTANCE_INIT: &str = "INSTANCE-002";
    pub const INSTANCE_SINGLETON_CONFLICT: &str = "INSTANCE-003";
    pub const INSTANCE_DUPLICATE: &str = "INSTANCE-004";
    pub const INSTANCE_NOT_FOUND: &str = "INSTANCE-005";
    pub const INSTANCE_STOP: &str = "INSTANCE-006";

    // 存储错误 (STORAGE-xxx)
    pub const STORAGE_PERSISTENCE: &str = "STORAGE-001";
    pub const STORAGE_IO: &str = "STORAGE-002";
    pub const STORAGE_FORMAT: &str = "STORAGE-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 事件错误 (EVENT-xxx)
    pub const EVENT_PUBLISH_FAILED: &str = "EVENT-001";
    pub const EVENT_SUBSCRIPTION_NOT_FOUND: &str = "EVENT-002";
    pub const EVENT_NOTIFICATION_NOT_FOUND: &str = "EVENT-003";

    // 核心错误 (CORE-xxx)
    pub const CORE_INVALID_STATE: &str = "CORE-001";
    pub const CORE_INIT_FAILED: &str = "CORE-002";
    pub const CORE_INTERNAL: &str = "CORE-003";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DuplicateModule(_) => error_code::MODULE_DUPLICATE,
            CoreError::ModuleMetadata { .. } => error_code::MODULE_METADATA,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::DependencyMissing { .. } => error_code::MODULE_DEPENDENCY_MISSING,
            CoreError::DependencyUnavailable { .. } => error_code::MODULE_DEPENDENCY_UNAVAILABLE,
            CoreError::ModuleActivation { .. } => error_code::MODULE_ACTIVATION,
            CoreError::InvalidStateTransition { .. } => error_code::MODULE_STATE_TRANSITION,
            CoreError::InstanceConstruction { .. } => error_code::INSTANCE_CONSTRUCTION,
            CoreError::InstanceInit { .. } => error_code::INSTANCE_INIT,
            CoreError::InstanceStop { .. } => error_code::INSTANCE_STOP,
            CoreError::SingletonConflict { .. } => error_code::INSTANCE_SINGLETON_CONFLICT,
            CoreError::DuplicateInstance(_) => error_code::INSTANCE_DUPLICATE,
            CoreError::InstanceNotFound(_) => error_code::INSTANCE_NOT_FOUND,
            CoreError::Persistence { .. } => error_code::STORAGE_PERSISTENCE,
            CoreError::Io(_) => error_code::STORAGE_IO,
            CoreError::Json(_) | CoreError::Yaml(_) => error_code::STORAGE_FORMAT,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::EventPublishFailed(_) => error_code::EVENT_PUBLISH_FAILED,
            CoreError::SubscriptionNotFound(_) => error_code::EVENT_SUBSCRIPTION_NOT_FOUND,
            CoreError::NotificationNotFound(_) => error_code::EVENT_NOTIFICATION_NOT_FOUND,
            CoreError::InvalidState(_) => error_code::CORE_INVALID_STATE,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Internal(_) => error_code::CORE_INTERNAL,
        }
    }

    /// 转换为通知时使用的严重级别
    ///
    /// 单例冲突只是警告，其余错误均为错误级别。
    pub fn severity(&self) -> NotificationLevel {
        match self {
            CoreError::SingletonConflict { .. } => NotificationLevel::Warning,
            _ => NotificationLevel::Error,
        }
    }

    /// 是否为不可恢复的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Persistence { .. })
    }

    /// 构造持久化错误
    pub fn persistence(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CoreError::Persistence {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
