//! 依赖加载器
//!
//! 按依赖顺序激活模块并实例化其实例记录。
//!
//! # 加载流程
//!
//! 模块按 ID 升序依次加载；加载一个模块前先递归加载它声明的依赖：
//!
//! 1. 已加载的模块直接返回成功，已失败的模块直接返回失败（不重复报告）
//! 2. 模块出现在当前依赖路径上时判定为循环依赖
//! 3. 依赖未登记或被标记为跳过时判定为缺失
//! 4. 依赖加载失败，或依赖有启用的记录却没有运行中的实例时，判定为依赖不可用
//! 5. 依赖全部可用后激活模块，绑定实例工厂，实例化该模块的记录
//!
//! 每个失败的模块只报告一次（通知 + `core.error`），不会回滚已加载的模块。

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, instrument, warn};

use super::lifecycle::LifecycleManager;
use super::metadata::LoadState;
use super::registry::ModuleRegistry;
use super::runtime::ModuleActivator;
use crate::bus::{NotificationCenter, CORE_CATEGORY};
use crate::utils::{CoreError, Result};

/// 一次加载的结果
#[derive(Debug, Default)]
pub struct LoadReport {
    /// 本次加载成功的模块，依赖在前
    pub order: Vec<String>,
    /// 本次加载失败的模块及原因
    pub failed: Vec<(String, CoreError)>,
    /// 标记为跳过的模块
    pub skipped: Vec<String>,
}

impl LoadReport {
    /// 模块是否在本次加载中失败
    pub fn is_failed(&self, module_id: &str) -> bool {
        self.failed.iter().any(|(id, _)| id == module_id)
    }

    /// 本次加载中某模块的失败原因
    pub fn failure(&self, module_id: &str) -> Option<&CoreError> {
        self.failed
            .iter()
            .find(|(id, _)| id == module_id)
            .map(|(_, err)| err)
    }

    /// 没有任何模块失败
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 依赖加载器
pub struct DependencyLoader {
    registry: ModuleRegistry,
    activator: Arc<dyn ModuleActivator>,
    lifecycle: Arc<LifecycleManager>,
    notifications: Arc<NotificationCenter>,
}

impl DependencyLoader {
    /// 创建依赖加载器
    pub fn new(
        registry: ModuleRegistry,
        activator: Arc<dyn ModuleActivator>,
        lifecycle: Arc<LifecycleManager>,
        notifications: Arc<NotificationCenter>,
    ) -> Self {
        Self {
            registry,
            activator,
            lifecycle,
            notifications,
        }
    }

    /// 加载所有已登记的模块
    ///
    /// 模块失败不会中断其他模块的加载；失败原因汇总在返回的报告中。
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();

        for module_id in self.registry.ids().await {
            let skipped = self
                .registry
                .lookup(&module_id)
                .await
                .map(|d| d.is_skipped())
                .unwrap_or(false);
            if skipped {
                debug!(module_id = %module_id, "模块标记为跳过");
                report.skipped.push(module_id);
                continue;
            }

            let mut path = Vec::new();
            self.load_recursive(&module_id, &mut path, &mut report).await;
        }

        info!(
            loaded = report.order.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "模块加载完成"
        );
        report
    }

    /// 加载单个模块（连同其依赖）
    ///
    /// # Errors
    ///
    /// - 模块未登记时返回 `CoreError::ModuleNotFound`
    /// - 模块被标记为跳过或加载失败时返回对应的加载错误
    pub async fn load_module(&self, module_id: &str) -> Result<()> {
        let descriptor = self
            .registry
            .lookup(module_id)
            .await
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        if descriptor.is_skipped() {
            return Err(CoreError::ModuleActivation {
                module_id: module_id.to_string(),
                reason: "模块被标记为跳过".to_string(),
            });
        }

        let mut report = LoadReport::default();
        let mut path = Vec::new();
        if self.load_recursive(module_id, &mut path, &mut report).await {
            return Ok(());
        }

        let own = report
            .failed
            .into_iter()
            .find(|(id, _)| id == module_id)
            .map(|(_, err)| err);
        Err(own.unwrap_or_else(|| CoreError::ModuleActivation {
            module_id: module_id.to_string(),
            reason: descriptor
                .last_error
                .unwrap_or_else(|| "先前加载失败".to_string()),
        }))
    }

    /// 深度优先加载，返回模块是否处于已加载状态
    fn load_recursive<'a>(
        &'a self,
        module_id: &'a str,
        path: &'a mut Vec<String>,
        report: &'a mut LoadReport,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(descriptor) = self.registry.lookup(module_id).await else {
                return false;
            };

            match descriptor.load_state {
                LoadState::Loaded => return true,
                LoadState::Failed => return false,
                LoadState::Discovered | LoadState::Loading => {}
            }

            if path.iter().any(|p| p == module_id) {
                let mut cycle = path.clone();
                cycle.push(module_id.to_string());
                let err = CoreError::CircularDependency(cycle.join(" -> "));
                self.fail(module_id, err, report).await;
                return false;
            }

            if let Err(e) = self.registry.transition(module_id, LoadState::Loading).await {
                warn!(module_id = %module_id, error = %e, "无法进入加载状态");
                return false;
            }
            debug!(module_id = %module_id, depth = path.len(), "开始加载模块");

            path.push(module_id.to_string());
            let mut dependency_error = None;
            for dep in descriptor.dependencies() {
                if let Some(err) = self.check_dependency(module_id, dep, path, report).await {
                    dependency_error = Some(err);
                    break;
                }
            }
            path.pop();

            if let Some(err) = dependency_error {
                self.fail(module_id, err, report).await;
                return false;
            }

            let factory = match self.activator.activate(&descriptor).await {
                Ok(factory) => factory,
                Err(e) => {
                    let err = CoreError::ModuleActivation {
                        module_id: module_id.to_string(),
                        reason: format!("{:#}", e),
                    };
                    self.fail(module_id, err, report).await;
                    return false;
                }
            };

            if let Err(e) = self.registry.bind_factory(module_id, factory).await {
                warn!(module_id = %module_id, error = %e, "无法绑定实例工厂");
                return false;
            }
            report.order.push(module_id.to_string());

            let started = self.lifecycle.instantiate_module_records(module_id).await;
            info!(module_id = %module_id, instances = started, "模块已加载");
            true
        })
    }

    /// 加载并检查一个依赖，不可用时返回依赖方的错误
    async fn check_dependency(
        &self,
        module_id: &str,
        dependency: &str,
        path: &mut Vec<String>,
        report: &mut LoadReport,
    ) -> Option<CoreError> {
        let usable = self
            .registry
            .lookup(dependency)
            .await
            .map(|d| !d.is_skipped())
            .unwrap_or(false);
        if !usable {
            return Some(CoreError::DependencyMissing {
                module: module_id.to_string(),
                dependency: dependency.to_string(),
            });
        }

        if !self.load_recursive(dependency, path, report).await {
            return Some(CoreError::DependencyUnavailable {
                module: module_id.to_string(),
                dependency: dependency.to_string(),
                reason: "未能加载".to_string(),
            });
        }

        let (enabled, running) = self.lifecycle.module_availability(dependency).await;
        if enabled > 0 && running == 0 {
            return Some(CoreError::DependencyUnavailable {
                module: module_id.to_string(),
                dependency: dependency.to_string(),
                reason: "没有运行中的实例".to_string(),
            });
        }
        None
    }

    /// 标记失败；每个模块只报告一次
    async fn fail(&self, module_id: &str, err: CoreError, report: &mut LoadReport) {
        match self.registry.mark_failed(module_id, &err.to_string()).await {
            Ok(true) => {
                warn!(module_id = %module_id, error_code = err.error_code(), error = %err, "模块加载失败");
                self.notifications.report(&err, CORE_CATEGORY).await;
                report.failed.push((module_id.to_string(), err));
            }
            Ok(false) => {}
            Err(e) => warn!(module_id = %module_id, error = %e, "无法标记模块失败"),
        }
    }
}
