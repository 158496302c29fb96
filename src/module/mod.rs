//! 模块管理模块
//!
//! 包含模块系统的核心组件：
//! - 模块元数据定义与解析
//! - 模块注册表
//! - 依赖关系图与依赖加载器
//! - 实例数据模型与生命周期管理
//! - 模块激活接口

pub mod dependency;
pub mod instance;
pub mod lifecycle;
pub mod loader;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod runtime;

// 重导出常用类型
pub use dependency::{DependencyGraph, LoadPlan};
pub use instance::{
    InstanceId, InstanceParams, InstanceRecord, InstanceState, InstanceUpdate, LiveInstance,
    STATUS_ENABLE, STATUS_KEY,
};
pub use lifecycle::LifecycleManager;
pub use loader::{DependencyLoader, LoadReport};
pub use metadata::{LoadState, ModuleDescriptor, ModuleMetadata};
pub use parser::{ModuleParser, METADATA_JSON, METADATA_YAML};
pub use registry::{ModuleRegistry, ScanReport};
pub use runtime::{
    ControllerHandle, ModuleActivator, ModuleContext, ModuleFactory, ModuleInstance,
    StaticActivator,
};
