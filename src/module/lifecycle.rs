//! 实例生命周期管理器
//!
//! 管理实例记录和运行中的实例：创建、实例化、停止、重新配置、删除。
//!
//! 所有变更操作通过同一把互斥锁串行执行，一个操作完成后下一个才开始。
//! 模块实例的 `init` / `stop` 钩子在持锁期间调用，因此模块不能在钩子里
//! 回调生命周期管理器。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::instance::{
    InstanceId, InstanceParams, InstanceRecord, InstanceState, InstanceUpdate, LiveInstance,
};
use super::registry::ModuleRegistry;
use super::runtime::{ControllerHandle, ModuleContext};
use crate::bus::{core_events, Event, EventBus, NotificationCenter, CORE_CATEGORY};
use crate::storage::ConfigStore;
use crate::utils::{CoreError, Result};

/// 生命周期状态，受同一把锁保护
#[derive(Debug, Default)]
struct LifecycleState {
    /// 实例记录，按 ID 升序
    records: Vec<InstanceRecord>,
    /// 运行中的实例；运行中的实例一定有记录
    live: BTreeMap<InstanceId, LiveInstance>,
    /// 已有运行实例的单例模块
    singletons: BTreeSet<String>,
    /// 曾经运行、现已停止的实例
    stopped: BTreeSet<InstanceId>,
    /// 已删除的实例
    removed: BTreeSet<InstanceId>,
}

impl LifecycleState {
    fn record(&self, id: InstanceId) -> Option<&InstanceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn record_mut(&mut self, id: InstanceId) -> Option<&mut InstanceRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn next_id(&self) -> InstanceId {
        self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }
}

/// 实例生命周期管理器
pub struct LifecycleManager {
    state: Mutex<LifecycleState>,
    registry: ModuleRegistry,
    config_store: Arc<ConfigStore>,
    notifications: Arc<NotificationCenter>,
    bus: EventBus,
}

impl LifecycleManager {
    /// 创建生命周期管理器
    pub fn new(
        registry: ModuleRegistry,
        config_store: Arc<ConfigStore>,
        notifications: Arc<NotificationCenter>,
        bus: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(LifecycleState::default()),
            registry,
            config_store,
            notifications,
            bus,
        }
    }

    /// 载入持久化的实例记录，替换内存中的记录
    pub async fn load_records(&self, mut records: Vec<InstanceRecord>) -> usize {
        records.sort_by_key(|r| r.id);
        let count = records.len();
        let mut state = self.state.lock().await;
        state.records = records;
        state.removed.clear();
        debug!(count = count, "已载入实例记录");
        count
    }

    // ==================== 变更操作 ====================

    /// 创建实例
    ///
    /// 分配新的实例 ID（现有最大 ID + 1），保存记录并发布
    /// `core.instanceCreated`，随后尝试实例化。实例化失败不影响创建结果，
    /// 失败原因以通知形式报告。
    ///
    /// # Errors
    ///
    /// - 模块未登记时返回 `CoreError::ModuleNotFound`
    /// - 保存记录失败时返回 `CoreError::Persistence`
    pub async fn create(&self, module_id: &str, params: InstanceParams) -> Result<InstanceRecord> {
        if !self.registry.contains(module_id).await {
            let err = CoreError::ModuleNotFound(module_id.to_string());
            self.notifications.report(&err, CORE_CATEGORY).await;
            return Err(err);
        }

        let mut state = self.state.lock().await;
        let record = InstanceRecord::new(state.next_id(), module_id, params);
        state.records.push(record.clone());
        if let Err(e) = self.config_store.save_instances(&state.records).await {
            state.records.pop();
            return Err(e);
        }
        // 复用已删除的最大 ID 时清掉旧标记
        state.removed.remove(&record.id);

        info!(instance_id = record.id, module_id = %module_id, "创建实例");
        self.emit(core_events::INSTANCE_CREATED, record.id).await;

        self.instantiate_locked(&mut state, record.clone()).await;
        Ok(record)
    }

    /// 按记录实例化
    ///
    /// 返回实例是否进入运行状态。未启用、模块未知、单例冲突、构造或
    /// 初始化失败都返回 `Ok(false)`，除未启用外均以通知报告。
    ///
    /// # Errors
    ///
    /// 记录不存在时返回 `CoreError::InstanceNotFound`
    pub async fn instantiate(&self, id: InstanceId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let record = match state.record(id) {
            Some(record) => record.clone(),
            None => return Err(self.not_found(id).await),
        };
        Ok(self.instantiate_locked(&mut state, record).await)
    }

    /// 实例化某个模块的所有记录（按 ID 升序），返回进入运行状态的数量
    ///
    /// 已经运行的实例会作为重复注册报告。
    pub async fn instantiate_module_records(&self, module_id: &str) -> usize {
        let mut state = self.state.lock().await;
        let records: Vec<InstanceRecord> = state
            .records
            .iter()
            .filter(|r| r.module_id == module_id)
            .cloned()
            .collect();

        let mut started = 0;
        for record in records {
            if self.instantiate_locked(&mut state, record).await {
                started += 1;
            }
        }
        started
    }

    /// 停止实例，保留记录
    ///
    /// 实例未运行时什么也不做，返回 `Ok(false)`。
    ///
    /// # Errors
    ///
    /// 保存记录失败时返回 `CoreError::Persistence`
    pub async fn remove(&self, id: InstanceId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(live) = state.live.remove(&id) else {
            debug!(instance_id = id, "实例未运行，无需停止");
            return Ok(false);
        };

        self.stop_live(&mut state, live).await;
        self.emit(core_events::INSTANCE_STOPPED, id).await;
        self.config_store.save_instances(&state.records).await?;
        Ok(true)
    }

    /// 删除实例：停止运行中的实例并删除记录
    ///
    /// # Errors
    ///
    /// - 实例既没有记录也没有运行时返回 `CoreError::InstanceNotFound`
    /// - 保存记录失败时返回 `CoreError::Persistence`
    pub async fn delete(&self, id: InstanceId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.record(id).is_none() && !state.live.contains_key(&id) {
            return Err(self.not_found(id).await);
        }

        if let Some(live) = state.live.remove(&id) {
            self.stop_live(&mut state, live).await;
            self.emit(core_events::INSTANCE_STOPPED, id).await;
        }

        state.records.retain(|r| r.id != id);
        state.stopped.remove(&id);
        state.removed.insert(id);
        self.config_store.save_instances(&state.records).await?;

        info!(instance_id = id, "删除实例");
        self.emit(core_events::INSTANCE_DELETED, id).await;
        Ok(())
    }

    /// 重新配置实例
    ///
    /// | 运行中 | 目标状态 | 行为 |
    /// |--------|----------|------|
    /// | 是 | enable | 停止后用新参数在原对象上重新 `init`（失败则保持停止） |
    /// | 是 | 其他 | 停止，把新参数交给 `save_new_config` |
    /// | 否 | enable | 更新记录后实例化 |
    /// | 否 | 其他 | 只更新记录 |
    ///
    /// 只有请求带 `params` 时才替换记录参数；记录随后保存，并发布
    /// `core.instanceReconfigured`。钩子收到的是合并了 `status` 的有效参数。
    ///
    /// # Errors
    ///
    /// - 记录不存在时返回 `CoreError::InstanceNotFound`
    /// - 保存记录失败时返回 `CoreError::Persistence`
    pub async fn reconfigure(&self, id: InstanceId, update: InstanceUpdate) -> Result<InstanceRecord> {
        let mut state = self.state.lock().await;
        let Some(current) = state.record(id).cloned() else {
            return Err(self.not_found(id).await);
        };

        let params = update.effective_params(&current);
        let enable = update.is_enable();
        let was_live = state.live.contains_key(&id);

        if let Some(mut live) = state.live.remove(&id) {
            let module_id = live.module_id.clone();
            self.run_stop_hook(&mut live).await;
            if live.singleton {
                state.singletons.remove(&module_id);
            }

            if enable {
                match live.handle.init(&params).await {
                    Ok(()) => {
                        debug!(instance_id = id, module_id = %module_id, "实例已按新配置重新初始化");
                        if live.singleton {
                            state.singletons.insert(module_id);
                        }
                        live.started_at = Utc::now();
                        state.live.insert(id, live);
                    }
                    Err(e) => {
                        let err = CoreError::InstanceInit {
                            instance_id: id,
                            module_id,
                            reason: format!("{:#}", e),
                        };
                        self.notifications.report(&err, CORE_CATEGORY).await;
                        state.stopped.insert(id);
                        self.emit(core_events::INSTANCE_STOPPED, id).await;
                    }
                }
            } else {
                if let Err(e) = live.handle.save_new_config(&params).await {
                    warn!(instance_id = id, module_id = %module_id, error = %e, "模块未能保存新配置");
                }
                state.stopped.insert(id);
                self.emit(core_events::INSTANCE_STOPPED, id).await;
            }
        }

        if let Some(record) = state.record_mut(id) {
            update.apply_to(record);
        }

        self.config_store.save_instances(&state.records).await?;

        let updated = state.record(id).cloned().unwrap_or(current);
        if enable && !was_live {
            // 按请求的有效参数实例化，持久化的记录保持不变
            let mut target = updated.clone();
            target.params = params;
            self.instantiate_locked(&mut state, target).await;
        }

        info!(instance_id = id, status = ?update.effective_status(), "重新配置实例");
        self.emit(core_events::INSTANCE_RECONFIGURED, id).await;
        Ok(updated)
    }

    /// 停止所有运行中的实例（按 ID 升序），保留记录
    pub async fn stop_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<InstanceId> = state.live.keys().copied().collect();
        for id in &ids {
            if let Some(live) = state.live.remove(id) {
                self.stop_live(&mut state, live).await;
                self.emit(core_events::INSTANCE_STOPPED, *id).await;
            }
        }
        state.singletons.clear();
        if !ids.is_empty() {
            info!(count = ids.len(), "已停止所有实例");
        }
        ids.len()
    }

    // ==================== 查询 ====================

    /// 所有实例记录（按 ID 升序）
    pub async fn records(&self) -> Vec<InstanceRecord> {
        self.state.lock().await.records.clone()
    }

    /// 单个实例记录
    pub async fn record(&self, id: InstanceId) -> Option<InstanceRecord> {
        self.state.lock().await.record(id).cloned()
    }

    /// 实例是否运行中
    pub async fn is_running(&self, id: InstanceId) -> bool {
        self.state.lock().await.live.contains_key(&id)
    }

    /// 运行中的实例 ID（升序）
    pub async fn live_ids(&self) -> Vec<InstanceId> {
        self.state.lock().await.live.keys().copied().collect()
    }

    /// 实例的可观察状态，从未存在过的 ID 返回 `None`
    pub async fn instance_state(&self, id: InstanceId) -> Option<InstanceState> {
        let state = self.state.lock().await;
        if state.live.contains_key(&id) {
            Some(InstanceState::Running)
        } else if state.removed.contains(&id) {
            Some(InstanceState::Removed)
        } else if state.record(id).is_some() {
            if state.stopped.contains(&id) {
                Some(InstanceState::Stopped)
            } else {
                Some(InstanceState::Defined)
            }
        } else {
            None
        }
    }

    /// 已有运行实例的单例模块（升序）
    pub async fn active_singletons(&self) -> Vec<String> {
        self.state.lock().await.singletons.iter().cloned().collect()
    }

    /// 某模块的可用性：`(启用的记录数, 运行中的实例数)`
    pub async fn module_availability(&self, module_id: &str) -> (usize, usize) {
        let state = self.state.lock().await;
        let enabled = state
            .records
            .iter()
            .filter(|r| r.module_id == module_id && r.is_enabled())
            .count();
        let running = state
            .live
            .values()
            .filter(|l| l.module_id == module_id)
            .count();
        (enabled, running)
    }

    // ==================== 内部实现 ====================

    async fn instantiate_locked(&self, state: &mut LifecycleState, record: InstanceRecord) -> bool {
        let id = record.id;
        let module_id = record.module_id.clone();

        let Some(descriptor) = self.registry.lookup(&module_id).await else {
            let err = CoreError::ModuleNotFound(module_id);
            self.notifications.report(&err, CORE_CATEGORY).await;
            return false;
        };

        if !record.is_enabled() {
            debug!(instance_id = id, module_id = %module_id, status = ?record.status(), "实例未启用，跳过");
            return false;
        }

        if state.live.contains_key(&id) {
            self.notifications
                .report(&CoreError::DuplicateInstance(id), CORE_CATEGORY)
                .await;
            return false;
        }

        let singleton = descriptor.is_singleton();
        if singleton && state.singletons.contains(&module_id) {
            let err = CoreError::SingletonConflict {
                instance_id: id,
                module_id,
            };
            self.notifications.report(&err, CORE_CATEGORY).await;
            return false;
        }

        let Some(factory) = descriptor.factory.clone() else {
            let err = CoreError::InstanceConstruction {
                instance_id: id,
                module_id,
                reason: "模块尚未激活".to_string(),
            };
            self.notifications.report(&err, CORE_CATEGORY).await;
            return false;
        };

        let ctx = ModuleContext {
            module_id: module_id.clone(),
            location: descriptor.location.clone(),
            controller: self.handle(),
        };

        let mut handle = match factory.construct(id, ctx) {
            Ok(handle) => handle,
            Err(e) => {
                let err = CoreError::InstanceConstruction {
                    instance_id: id,
                    module_id,
                    reason: format!("{:#}", e),
                };
                self.notifications.report(&err, CORE_CATEGORY).await;
                return false;
            }
        };
        debug!(instance_id = id, module_id = %module_id, state = %InstanceState::Instantiated, "实例已构造");

        if let Err(e) = handle.init(&record.params).await {
            let err = CoreError::InstanceInit {
                instance_id: id,
                module_id,
                reason: format!("{:#}", e),
            };
            self.notifications.report(&err, CORE_CATEGORY).await;
            return false;
        }

        state.live.insert(
            id,
            LiveInstance {
                id,
                module_id: module_id.clone(),
                singleton,
                started_at: Utc::now(),
                handle,
            },
        );
        if singleton {
            state.singletons.insert(module_id.clone());
        }
        state.stopped.remove(&id);

        info!(instance_id = id, module_id = %module_id, "实例已启动");
        self.emit(core_events::INSTANCE_REGISTERED, id).await;
        true
    }

    /// 运行停止钩子并释放单例占用
    async fn stop_live(&self, state: &mut LifecycleState, mut live: LiveInstance) {
        self.run_stop_hook(&mut live).await;
        if live.singleton {
            state.singletons.remove(&live.module_id);
        }
        state.stopped.insert(live.id);
        info!(instance_id = live.id, module_id = %live.module_id, "实例已停止");
    }

    /// 停止钩子失败只报告，不中断停止流程
    async fn run_stop_hook(&self, live: &mut LiveInstance) {
        if let Err(e) = live.handle.stop().await {
            let err = CoreError::InstanceStop {
                instance_id: live.id,
                module_id: live.module_id.clone(),
                reason: format!("{:#}", e),
            };
            self.notifications.report(&err, CORE_CATEGORY).await;
        }
    }

    async fn not_found(&self, id: InstanceId) -> CoreError {
        let err = CoreError::InstanceNotFound(id);
        self.notifications.report(&err, CORE_CATEGORY).await;
        err
    }

    async fn emit(&self, event_type: &str, id: InstanceId) {
        self.bus
            .publish(Event::core(event_type, json!({ "instanceId": id })))
            .await;
    }

    fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            bus: self.bus.clone(),
            notifications: self.notifications.clone(),
        }
    }
}
