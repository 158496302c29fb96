//! 核心模块
//!
//! 包含内核配置。

pub mod config;

pub use config::{
    CoreConfig, CoreConfigBuilder, EventConfig, LogConfig, ModuleConfig, StorageConfig,
};
