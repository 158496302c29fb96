//! 模块激活接口
//!
//! 内核不关心模块如何实现，只通过以下接口与模块交互：
//!
//! - [`ModuleActivator`]: 宿主提供，把模块描述符激活为实例工厂
//! - [`ModuleFactory`]: 激活结果，按实例 ID 构造实例对象
//! - [`ModuleInstance`]: 运行中的实例，`init` / `stop` / `save_new_config`
//!
//! [`StaticActivator`] 是按模块 ID 查表的能力表实现。

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::instance::{InstanceId, InstanceParams};
use super::metadata::ModuleDescriptor;
use crate::bus::{EventBus, NotificationCenter};

/// 模块可访问的控制器句柄
#[derive(Clone)]
pub struct ControllerHandle {
    /// 事件总线
    pub bus: EventBus,
    /// 通知中心
    pub notifications: Arc<NotificationCenter>,
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle").finish_non_exhaustive()
    }
}

/// 构造实例时传入的上下文
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// 模块 ID
    pub module_id: String,
    /// 模块所在目录
    pub location: PathBuf,
    /// 控制器句柄
    pub controller: ControllerHandle,
}

/// 运行中的模块实例
#[async_trait]
pub trait ModuleInstance: Send + Sync {
    /// 按参数初始化；重新配置为启用时也会在原对象上再次调用
    async fn init(&mut self, params: &InstanceParams) -> anyhow::Result<()>;

    /// 停止实例
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// 实例被禁用时接收新配置
    async fn save_new_config(&mut self, _params: &InstanceParams) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 实例工厂
pub trait ModuleFactory: Send + Sync {
    /// 构造实例对象（尚未初始化）
    fn construct(
        &self,
        instance_id: InstanceId,
        ctx: ModuleContext,
    ) -> anyhow::Result<Box<dyn ModuleInstance>>;
}

impl<F> ModuleFactory for F
where
    F: Fn(InstanceId, ModuleContext) -> anyhow::Result<Box<dyn ModuleInstance>> + Send + Sync,
{
    fn construct(
        &self,
        instance_id: InstanceId,
        ctx: ModuleContext,
    ) -> anyhow::Result<Box<dyn ModuleInstance>> {
        self(instance_id, ctx)
    }
}

/// 模块激活器
///
/// 每个模块在加载时最多激活一次。
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    async fn activate(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<Arc<dyn ModuleFactory>>;
}

/// 能力表激活器：模块 ID -> 实例工厂
#[derive(Default, Clone)]
pub struct StaticActivator {
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
}

impl StaticActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记模块工厂
    pub fn register(&mut self, module_id: impl Into<String>, factory: Arc<dyn ModuleFactory>) {
        self.factories.insert(module_id.into(), factory);
    }

    /// 登记模块工厂（构建器风格）
    pub fn with(mut self, module_id: impl Into<String>, factory: Arc<dyn ModuleFactory>) -> Self {
        self.register(module_id, factory);
        self
    }

    /// 已登记的模块 ID
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for StaticActivator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticActivator")
            .field("modules", &self.module_ids())
            .finish()
    }
}

#[async_trait]
impl ModuleActivator for StaticActivator {
    async fn activate(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<Arc<dyn ModuleFactory>> {
        self.factories
            .get(descriptor.id())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("没有为模块 '{}' 登记实例工厂", descriptor.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::ModuleMetadata;

    struct Noop;

    #[async_trait]
    impl ModuleInstance for Noop {
        async fn init(&mut self, _params: &InstanceParams) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop_factory() -> Arc<dyn ModuleFactory> {
        Arc::new(|_id: InstanceId, _ctx: ModuleContext| -> anyhow::Result<Box<dyn ModuleInstance>> {
            Ok(Box::new(Noop))
        })
    }

    #[tokio::test]
    async fn test_static_activator_lookup() {
        let activator = StaticActivator::new().with("Cron", noop_factory());
        assert_eq!(activator.module_ids(), vec!["Cron"]);

        let cron = ModuleDescriptor::new(ModuleMetadata::new("Cron"), "/m/Cron");
        assert!(activator.activate(&cron).await.is_ok());

        let other = ModuleDescriptor::new(ModuleMetadata::new("Other"), "/m/Other");
        let err = activator.activate(&other).await.err().unwrap();
        assert!(err.to_string().contains("Other"));
    }

    #[tokio::test]
    async fn test_default_save_new_config_is_noop() {
        let mut instance = Noop;
        assert!(instance.save_new_config(&InstanceParams::new()).await.is_ok());
    }
}
