//! 模块注册表
//!
//! 保存模块 ID 到描述符的映射。按 ID 排序存储，枚举顺序即加载顺序。
//! 加载状态只能由依赖加载器通过 crate 内部接口推进。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::module::metadata::{LoadState, ModuleDescriptor, ModuleMetadata};
use crate::module::parser::ModuleParser;
use crate::module::runtime::ModuleFactory;
use crate::utils::{CoreError, Result};

/// 扫描结果
#[derive(Debug, Default)]
pub struct ScanReport {
    /// 成功登记的模块 ID（按发现顺序）
    pub registered: Vec<String>,
    /// 登记失败的模块及原因
    pub errors: Vec<CoreError>,
}

/// 模块注册表
///
/// 克隆得到的是同一注册表的句柄。
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    /// 已登记的模块：module_id -> ModuleDescriptor
    modules: Arc<RwLock<BTreeMap<String, ModuleDescriptor>>>,

    /// 模块目录，按顺序扫描
    module_dirs: Vec<PathBuf>,
}

impl ModuleRegistry {
    /// 创建新的模块注册表
    pub fn new(module_dirs: Vec<PathBuf>) -> Self {
        Self {
            modules: Arc::new(RwLock::new(BTreeMap::new())),
            module_dirs,
        }
    }

    /// 模块目录列表
    pub fn module_dirs(&self) -> &[PathBuf] {
        &self.module_dirs
    }

    /// 扫描所有模块目录
    ///
    /// - 目录按配置顺序扫描，同一目录内按名称排序
    /// - 普通文件忽略，没有描述文件的目录跳过
    /// - 描述文件无效或 ID 重复的模块记入 `errors`，不影响其他模块
    /// - 不存在的模块目录跳过
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();

        for dir in &self.module_dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!("无法读取模块目录 {:?}，跳过: {}", dir, e);
                    continue;
                }
            };

            let mut module_paths = Vec::new();
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if path.is_dir() {
                            module_paths.push(path);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("读取模块目录 {:?} 出错: {}", dir, e);
                        break;
                    }
                }
            }
            module_paths.sort();

            for path in module_paths {
                if ModuleParser::find_metadata_file(&path).is_none() {
                    tracing::trace!("目录 {:?} 中没有模块描述文件，跳过", path);
                    continue;
                }

                match self.register_dir(&path).await {
                    Ok(module_id) => {
                        tracing::info!(module_id = %module_id, path = ?path, "发现模块");
                        report.registered.push(module_id);
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "模块登记失败");
                        report.errors.push(e);
                    }
                }
            }
        }

        report
    }

    /// 解析并登记一个模块目录
    pub async fn register_dir(&self, module_path: &Path) -> Result<String> {
        let metadata = ModuleParser::parse_dir(module_path).await?;
        let module_id = metadata.id.clone();
        self.register(ModuleDescriptor::new(metadata, module_path))
            .await?;
        Ok(module_id)
    }

    /// 使用元数据直接登记模块
    ///
    /// 用于没有物理目录的模块（如内置模块或测试）
    pub async fn register_with_metadata(
        &self,
        metadata: ModuleMetadata,
        location: impl Into<PathBuf>,
    ) -> Result<String> {
        ModuleParser::validate(&metadata)?;
        let module_id = metadata.id.clone();
        self.register(ModuleDescriptor::new(metadata, location))
            .await?;
        Ok(module_id)
    }

    /// 登记描述符
    ///
    /// # Errors
    ///
    /// ID 已存在时返回 `CoreError::DuplicateModule`
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<()> {
        let mut modules = self.modules.write().await;
        let module_id = descriptor.id().to_string();
        if modules.contains_key(&module_id) {
            return Err(CoreError::DuplicateModule(module_id));
        }

        if descriptor.is_skipped() {
            tracing::debug!(module_id = %module_id, "模块标记为跳过，只登记不激活");
        }
        modules.insert(module_id, descriptor);
        Ok(())
    }

    /// 查找模块描述符
    pub async fn lookup(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.modules.read().await.get(module_id).cloned()
    }

    /// 模块是否已登记
    pub async fn contains(&self, module_id: &str) -> bool {
        self.modules.read().await.contains_key(module_id)
    }

    /// 所有模块 ID（升序）
    pub async fn ids(&self) -> Vec<String> {
        self.modules.read().await.keys().cloned().collect()
    }

    /// 所有模块描述符（按 ID 升序）
    pub async fn list(&self) -> Vec<ModuleDescriptor> {
        self.modules.read().await.values().cloned().collect()
    }

    /// 模块加载状态
    pub async fn load_state(&self, module_id: &str) -> Option<LoadState> {
        self.modules
            .read()
            .await
            .get(module_id)
            .map(|d| d.load_state)
    }

    /// 已登记模块数量
    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    /// 是否没有登记任何模块
    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }

    /// 推进加载状态
    ///
    /// # Errors
    ///
    /// - 模块不存在时返回 `CoreError::ModuleNotFound`
    /// - 非单调转换返回 `CoreError::InvalidStateTransition`
    pub(crate) async fn transition(&self, module_id: &str, to: LoadState) -> Result<()> {
        let mut modules = self.modules.write().await;
        let descriptor = modules
            .get_mut(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        if !descriptor.load_state.can_transition_to(to) {
            return Err(CoreError::InvalidStateTransition {
                module_id: module_id.to_string(),
                from: descriptor.load_state.to_string(),
                to: to.to_string(),
            });
        }

        tracing::trace!(module_id = %module_id, from = %descriptor.load_state, to = %to, "加载状态变更");
        descriptor.load_state = to;
        Ok(())
    }

    /// 标记为失败并记录原因
    ///
    /// 已经失败的模块保持不变，返回 `false`。
    pub(crate) async fn mark_failed(&self, module_id: &str, reason: &str) -> Result<bool> {
        if self.load_state(module_id).await == Some(LoadState::Failed) {
            return Ok(false);
        }
        self.transition(module_id, LoadState::Failed).await?;
        if let Some(descriptor) = self.modules.write().await.get_mut(module_id) {
            descriptor.last_error = Some(reason.to_string());
        }
        Ok(true)
    }

    /// 绑定实例工厂并标记为已加载
    pub(crate) async fn bind_factory(
        &self,
        module_id: &str,
        factory: Arc<dyn ModuleFactory>,
    ) -> Result<()> {
        self.transition(module_id, LoadState::Loaded).await?;
        if let Some(descriptor) = self.modules.write().await.get_mut(module_id) {
            descriptor.factory = Some(factory);
        }
        Ok(())
    }
}
