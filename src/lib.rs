//! # Automation Core - 自动化控制器内核
//!
//! 可插拔自动化控制器的内核，提供以下核心功能：
//!
//! - **模块注册表**: 扫描模块目录，解析并登记模块元数据
//! - **依赖加载器**: 按依赖顺序激活模块，检测循环依赖和缺失依赖
//! - **实例生命周期**: 实例的创建、实例化、重新配置、停止和删除
//! - **通知与事件**: 持久化通知日志和事件总线
//! - **配置与日志**: 统一的配置加载和结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use automation_core::{AutomationController, CoreConfig, MemoryStorage, StaticActivator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = AutomationController::new(
//!         CoreConfig::default(),
//!         Arc::new(StaticActivator::new()),
//!         Arc::new(MemoryStorage::new()),
//!     );
//!
//!     controller.init().await?;
//!     controller.start().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块元数据、注册表、依赖加载与实例生命周期
//! - `bus` - 事件总线与通知中心
//! - `storage` - 持久化服务与配置存储
//! - `utils` - 工具函数和错误类型
//! - `core` - 核心配置
//! - `api` - 控制器接口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod bus;
pub mod core;
pub mod module;
pub mod storage;
pub mod utils;

// 重导出常用类型，方便使用
pub use bus::{
    core_events, Event, EventBus, EventBusConfig, EventCallback, EventFilter, Notification,
    NotificationCenter, NotificationLevel,
};

pub use module::{
    ControllerHandle, DependencyGraph, DependencyLoader, InstanceId, InstanceParams,
    InstanceRecord, InstanceState, InstanceUpdate, LifecycleManager, LoadPlan, LoadReport,
    LoadState, ModuleActivator, ModuleContext, ModuleDescriptor, ModuleFactory, ModuleInstance,
    ModuleMetadata, ModuleRegistry, StaticActivator,
};

pub use storage::{ConfigStore, FileStorage, MemoryStorage, Storage, VdevInfo};

pub use utils::{error_code, generate_id, generate_uuid, CoreError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{CoreConfig, CoreConfigBuilder, EventConfig, LogConfig, ModuleConfig, StorageConfig};
pub use api::{AutomationController, ControllerState};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
