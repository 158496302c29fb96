//! AutomationController
//!
//! 自动化控制器的对外接口，协调模块注册表、依赖加载器、实例生命周期、
//! 通知中心和事件总线。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use automation_core::{AutomationController, CoreConfig, FileStorage, StaticActivator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder()
//!         .module_dirs(["modules", "userModules"])
//!         .data_dir("storage")
//!         .build();
//!
//!     let activator = Arc::new(StaticActivator::new());
//!     let storage = Arc::new(FileStorage::new(&config.storage.data_dir));
//!     let controller = AutomationController::new(config, activator, storage);
//!
//!     controller.init().await?;
//!     controller.start().await?;
//!     controller.stop().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::bus::{
    core_events, Event, EventBus, EventBusConfig, EventCallback, EventFilter, Notification,
    NotificationCenter, NotificationLevel, CORE_CATEGORY,
};
use crate::core::config::CoreConfig;
use crate::module::{
    ControllerHandle, DependencyGraph, DependencyLoader, InstanceId, InstanceParams,
    InstanceRecord, InstanceState, InstanceUpdate, LifecycleManager, LoadPlan, LoadReport,
    ModuleActivator, ModuleDescriptor, ModuleRegistry,
};
use crate::storage::{ConfigStore, Storage, VdevInfo};
use crate::utils::{CoreError, Result};

/// 重启后追加的警告通知
pub const RESTART_MESSAGE: &str = "Automation Controller is restarted";

// ============================================================================
// 控制器状态
// ============================================================================

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// 已创建，尚未初始化
    Created,
    /// 已初始化（模块已发现，配置已载入）
    Initialized,
    /// 运行中
    Running,
    /// 已停止
    Stopped,
}

impl ControllerState {
    /// 检查是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, ControllerState::Initialized | ControllerState::Stopped)
    }

    /// 检查是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ControllerState::Running)
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, ControllerState::Running)
    }
}

// ============================================================================
// AutomationController 主结构体
// ============================================================================

/// 自动化控制器
///
/// # 生命周期
///
/// 1. `new()` - 创建控制器
/// 2. `init()` - 扫描模块目录，载入持久化配置
/// 3. `start()` - 按依赖顺序加载模块并实例化记录
/// 4. `stop()` - 停止所有实例，记录保留
///
/// 停止后可以再次 `start()`：模块不会重新激活，已加载模块的记录按
/// 首次加载的顺序重新实例化。
pub struct AutomationController {
    /// 控制器配置
    config: CoreConfig,

    /// 控制器状态
    state: RwLock<ControllerState>,

    /// 模块注册表
    registry: ModuleRegistry,

    /// 依赖加载器
    loader: DependencyLoader,

    /// 实例生命周期管理器
    lifecycle: Arc<LifecycleManager>,

    /// 持久化配置
    config_store: Arc<ConfigStore>,

    /// 通知中心
    notifications: Arc<NotificationCenter>,

    /// 事件总线
    bus: EventBus,

    /// 首次加载得到的模块顺序
    load_order: RwLock<Option<Vec<String>>>,

    /// 启动时间
    started_at: RwLock<Option<Instant>>,
}

impl AutomationController {
    /// 创建控制器
    ///
    /// # Arguments
    ///
    /// * `config` - 控制器配置
    /// * `activator` - 模块激活器，把模块描述符激活为实例工厂
    /// * `storage` - 持久化服务
    pub fn new(
        config: CoreConfig,
        activator: Arc<dyn ModuleActivator>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let bus = EventBus::with_config(EventBusConfig::from_event_config(&config.events));
        let notifications = Arc::new(NotificationCenter::new(storage.clone(), bus.clone()));
        let config_store = Arc::new(ConfigStore::new(storage));
        let registry = ModuleRegistry::new(config.modules.module_dirs.clone());
        let lifecycle = Arc::new(LifecycleManager::new(
            registry.clone(),
            config_store.clone(),
            notifications.clone(),
            bus.clone(),
        ));
        let loader = DependencyLoader::new(
            registry.clone(),
            activator,
            lifecycle.clone(),
            notifications.clone(),
        );

        Self {
            config,
            state: RwLock::new(ControllerState::Created),
            registry,
            loader,
            lifecycle,
            config_store,
            notifications,
            bus,
            load_order: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 初始化控制器
    ///
    /// 载入通知，扫描模块目录并登记模块，载入持久化的实例记录，发布 `core.init`。
    /// 登记失败的模块以通知形式报告，不中断初始化。
    ///
    /// # Errors
    ///
    /// - 控制器已初始化时返回 `CoreError::InvalidState`
    /// - 通知或持久化配置不可读时返回 `CoreError::Persistence`
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != ControllerState::Created {
            return Err(CoreError::InvalidState(format!(
                "控制器当前状态 {:?} 不允许初始化",
                *state
            )));
        }

        info!("初始化自动化控制器 v{}", crate::VERSION);
        self.notifications.load().await?;

        let scan = self.registry.scan().await;
        for err in &scan.errors {
            self.notifications.report(err, CORE_CATEGORY).await;
        }
        debug!(
            registered = scan.registered.len(),
            errors = scan.errors.len(),
            "模块扫描完成"
        );

        let records = self.config_store.load().await?;
        self.lifecycle.load_records(records).await;

        self.bus.publish(Event::core(core_events::INIT, json!({}))).await;

        *state = ControllerState::Initialized;
        info!("自动化控制器已初始化");
        Ok(())
    }

    /// 启动控制器
    ///
    /// 首次启动时按依赖顺序加载全部模块；之后的启动按记住的顺序重新
    /// 实例化已加载模块的记录。
    ///
    /// # Errors
    ///
    /// 状态不允许启动时返回 `CoreError::InvalidState`
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_start() {
            return Err(CoreError::InvalidState(format!(
                "控制器当前状态 {:?} 不允许启动",
                *state
            )));
        }

        info!("启动自动化控制器...");

        let mut load_order = self.load_order.write().await;
        if let Some(order) = load_order.clone() {
            for module_id in &order {
                self.lifecycle.instantiate_module_records(module_id).await;
            }
        } else {
            let report = self.loader.load_all().await;
            *load_order = Some(report.order);
        }
        drop(load_order);

        self.bus
            .publish(Event::core(
                core_events::START,
                json!({
                    "version": crate::VERSION,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                }),
            ))
            .await;

        *state = ControllerState::Running;
        *self.started_at.write().await = Some(Instant::now());
        info!("自动化控制器已启动");
        Ok(())
    }

    /// 停止控制器
    ///
    /// 停止所有运行中的实例，记录保留。未运行时静默返回。
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_stop() {
            return Ok(());
        }

        info!("正在停止自动化控制器...");
        let stopped = self.lifecycle.stop_all().await;
        debug!(instances = stopped, "所有实例已停止");

        self.bus.publish(Event::core(core_events::STOP, json!({}))).await;

        *state = ControllerState::Stopped;
        *self.started_at.write().await = None;
        info!("自动化控制器已停止");
        Ok(())
    }

    /// 重启控制器，并追加一条警告通知
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await?;
        self.notifications
            .add(NotificationLevel::Warning, RESTART_MESSAGE, CORE_CATEGORY)
            .await?;
        Ok(())
    }

    // ========================================================================
    // 实例操作
    // ========================================================================

    /// 需要构造实例的操作只在运行状态下进行，此前模块尚未激活
    async fn ensure_running(&self, operation: &str) -> Result<()> {
        let state = *self.state.read().await;
        if !state.is_running() {
            warn!(operation, state = ?state, "控制器未运行，拒绝实例操作");
            return Err(CoreError::InvalidState(format!(
                "控制器当前状态 {:?} 不允许 {}",
                state, operation
            )));
        }
        Ok(())
    }

    /// 创建实例，见 [`LifecycleManager::create`]
    ///
    /// # Errors
    ///
    /// 控制器未运行时返回 `CoreError::InvalidState`
    #[instrument(skip(self, params))]
    pub async fn create_instance(
        &self,
        module_id: &str,
        params: InstanceParams,
    ) -> Result<InstanceRecord> {
        self.ensure_running("create_instance").await?;
        self.lifecycle.create(module_id, params).await
    }

    /// 重新配置实例，见 [`LifecycleManager::reconfigure`]
    ///
    /// # Errors
    ///
    /// 控制器未运行时返回 `CoreError::InvalidState`
    #[instrument(skip(self, update))]
    pub async fn reconfigure_instance(
        &self,
        id: InstanceId,
        update: InstanceUpdate,
    ) -> Result<InstanceRecord> {
        self.ensure_running("reconfigure_instance").await?;
        self.lifecycle.reconfigure(id, update).await
    }

    /// 停止实例（保留记录）
    #[instrument(skip(self))]
    pub async fn remove_instance(&self, id: InstanceId) -> Result<bool> {
        self.lifecycle.remove(id).await
    }

    /// 删除实例
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, id: InstanceId) -> Result<()> {
        self.lifecycle.delete(id).await
    }

    /// 按记录实例化，控制器未运行时返回 `CoreError::InvalidState`
    pub async fn instantiate(&self, id: InstanceId) -> Result<bool> {
        self.ensure_running("instantiate").await?;
        self.lifecycle.instantiate(id).await
    }

    /// 所有实例记录
    pub async fn instances(&self) -> Vec<InstanceRecord> {
        self.lifecycle.records().await
    }

    /// 单个实例记录
    pub async fn instance(&self, id: InstanceId) -> Option<InstanceRecord> {
        self.lifecycle.record(id).await
    }

    /// 实例状态
    pub async fn instance_state(&self, id: InstanceId) -> Option<InstanceState> {
        self.lifecycle.instance_state(id).await
    }

    /// 运行中的实例 ID
    pub async fn running_instances(&self) -> Vec<InstanceId> {
        self.lifecycle.live_ids().await
    }

    // ========================================================================
    // 模块
    // ========================================================================

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 所有模块描述符
    pub async fn modules(&self) -> Vec<ModuleDescriptor> {
        self.registry.list().await
    }

    /// 加载单个模块（连同依赖）
    pub async fn load_module(&self, module_id: &str) -> Result<()> {
        self.loader.load_module(module_id).await
    }

    /// 按当前注册表预演加载顺序，不激活任何模块
    pub async fn load_plan(&self) -> LoadPlan {
        DependencyGraph::from_descriptors(&self.registry.list().await).plan()
    }

    /// 首次启动时的加载顺序
    pub async fn load_order(&self) -> Option<Vec<String>> {
        self.load_order.read().await.clone()
    }

    /// 直接运行一次全量加载
    ///
    /// 已加载和已失败的模块不会重复处理。
    pub async fn load_all(&self) -> LoadReport {
        self.loader.load_all().await
    }

    // ========================================================================
    // 虚拟设备信息
    // ========================================================================

    /// 读取虚拟设备信息，未保存过时返回默认值
    pub async fn vdev_info(&self, device_id: &str) -> VdevInfo {
        self.config_store.vdev_info(device_id).await
    }

    /// 保存虚拟设备信息
    pub async fn set_vdev_info(&self, device_id: &str, info: VdevInfo) -> Result<VdevInfo> {
        self.config_store.set_vdev_info(device_id, info).await
    }

    // ========================================================================
    // 通知与事件
    // ========================================================================

    /// 追加通知
    pub async fn add_notification(
        &self,
        level: NotificationLevel,
        message: &str,
        category: &str,
    ) -> Result<Notification> {
        self.notifications.add(level, message, category).await
    }

    /// 列出通知
    pub async fn notifications(&self, since: i64, redeemed: Option<bool>) -> Vec<Notification> {
        self.notifications.list(since, redeemed).await
    }

    /// 通知中心
    pub fn notification_center(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    /// 订阅事件
    pub async fn subscribe(
        &self,
        subscriber_id: &str,
        event_type: &str,
        handler: EventCallback,
    ) -> Result<String> {
        self.bus
            .subscribe(subscriber_id, event_type, None, handler)
            .await
    }

    /// 订阅事件（带过滤器）
    pub async fn subscribe_with_filter(
        &self,
        subscriber_id: &str,
        event_type: &str,
        filter: EventFilter,
        handler: EventCallback,
    ) -> Result<String> {
        self.bus
            .subscribe(subscriber_id, event_type, Some(filter), handler)
            .await
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.bus.unsubscribe(subscription_id).await
    }

    /// 发布事件，返回匹配的订阅者数量
    pub async fn emit(&self, event: Event) -> usize {
        self.bus.publish(event).await
    }

    /// 事件总线
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// 传给模块的控制器句柄
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            bus: self.bus.clone(),
            notifications: self.notifications.clone(),
        }
    }

    // ========================================================================
    // 状态
    // ========================================================================

    /// 控制器状态
    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_running()
    }

    /// 控制器配置
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// 运行时间
    pub async fn uptime(&self) -> Option<std::time::Duration> {
        self.started_at.read().await.map(|t| t.elapsed())
    }
}
