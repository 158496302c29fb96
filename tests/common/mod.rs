//! 集成测试公共辅助
//!
//! - [`CountingActivator`]: 记录激活顺序的激活器，可指定激活失败的模块
//! - [`Probe`]: 记录 init / stop 调用的模块实例

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use automation_core::{
    CoreConfig, InstanceId, InstanceParams, InstanceRecord, ModuleActivator, ModuleContext,
    ModuleDescriptor, ModuleFactory, ModuleInstance,
};
use serde_json::{json, Value};

/// 实例调用计数
#[derive(Debug, Default)]
pub struct Counters {
    pub constructs: AtomicUsize,
    pub inits: AtomicUsize,
    pub stops: AtomicUsize,
    pub saved_configs: AtomicUsize,
    /// 最近一次 init 或 save_new_config 收到的参数
    pub last_params: Mutex<Option<InstanceParams>>,
}

impl Counters {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn constructs(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    pub fn saved_configs(&self) -> usize {
        self.saved_configs.load(Ordering::SeqCst)
    }
}

/// 测试用模块实例
pub struct Probe {
    counters: Arc<Counters>,
    fail_init: bool,
    fail_stop: bool,
}

#[async_trait]
impl ModuleInstance for Probe {
    async fn init(&mut self, params: &InstanceParams) -> anyhow::Result<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_params.lock().unwrap() = Some(params.clone());
        if self.fail_init || params.get("failInit") == Some(&Value::Bool(true)) {
            anyhow::bail!("init rejected");
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            anyhow::bail!("stop rejected");
        }
        Ok(())
    }

    async fn save_new_config(&mut self, params: &InstanceParams) -> anyhow::Result<()> {
        self.counters.saved_configs.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_params.lock().unwrap() = Some(params.clone());
        Ok(())
    }
}

/// 记录激活顺序的激活器
#[derive(Default)]
pub struct CountingActivator {
    pub activations: Mutex<Vec<String>>,
    pub counters: Arc<Counters>,
    fail_activation: HashSet<String>,
    fail_construct: HashSet<String>,
    fail_init: HashSet<String>,
    fail_stop: HashSet<String>,
}

impl CountingActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 激活该模块时返回错误
    pub fn failing_activation(mut self, module_id: &str) -> Self {
        self.fail_activation.insert(module_id.to_string());
        self
    }

    /// 该模块的实例构造失败
    pub fn failing_construct(mut self, module_id: &str) -> Self {
        self.fail_construct.insert(module_id.to_string());
        self
    }

    /// 该模块的实例 init 失败
    pub fn failing_init(mut self, module_id: &str) -> Self {
        self.fail_init.insert(module_id.to_string());
        self
    }

    /// 该模块的实例 stop 失败
    pub fn failing_stop(mut self, module_id: &str) -> Self {
        self.fail_stop.insert(module_id.to_string());
        self
    }

    /// 按顺序记录的激活调用
    pub fn activations(&self) -> Vec<String> {
        self.activations.lock().unwrap().clone()
    }

    /// 某模块被激活的次数
    pub fn activation_count(&self, module_id: &str) -> usize {
        self.activations
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == module_id)
            .count()
    }
}

#[async_trait]
impl ModuleActivator for CountingActivator {
    async fn activate(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<Arc<dyn ModuleFactory>> {
        let module_id = descriptor.id().to_string();
        self.activations.lock().unwrap().push(module_id.clone());
        if self.fail_activation.contains(&module_id) {
            anyhow::bail!("activation of {} rejected", module_id);
        }

        let counters = self.counters.clone();
        let fail_construct = self.fail_construct.contains(&module_id);
        let fail_init = self.fail_init.contains(&module_id);
        let fail_stop = self.fail_stop.contains(&module_id);

        Ok(Arc::new(
            move |_id: InstanceId, _ctx: ModuleContext| -> anyhow::Result<Box<dyn ModuleInstance>> {
                counters.constructs.fetch_add(1, Ordering::SeqCst);
                if fail_construct {
                    anyhow::bail!("construct rejected");
                }
                Ok(Box::new(Probe {
                    counters: counters.clone(),
                    fail_init,
                    fail_stop,
                }))
            },
        ))
    }
}

/// 在模块目录下写入一个模块
pub async fn write_module(root: &Path, id: &str, metadata: Value) {
    let dir = root.join(id);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("module.json"), metadata.to_string())
        .await
        .unwrap();
}

/// 在数据目录下写入持久化的实例记录
pub async fn write_instances(data_dir: &Path, records: &[InstanceRecord]) {
    tokio::fs::create_dir_all(data_dir).await.unwrap();
    let blob = json!({ "instances": records });
    tokio::fs::write(data_dir.join("config.json"), blob.to_string())
        .await
        .unwrap();
}

/// 使用临时目录的控制器配置
pub fn test_config(root: &Path) -> CoreConfig {
    CoreConfig::builder()
        .module_dirs([root.join("modules"), root.join("userModules")])
        .data_dir(root.join("storage"))
        .handler_timeout_ms(1000)
        .build()
}

/// 由 JSON 对象构造实例参数
pub fn params(value: Value) -> InstanceParams {
    value.as_object().cloned().unwrap_or_default()
}
