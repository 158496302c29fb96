//! 控制器配置对象
//!
//! 配置对象以单个 JSON 值保存在 `config.json` 键下，
//! 包含 `controller`、`vdevInfo`、`locations`、`profiles` 和 `instances` 五个段，
//! 每次修改都整体重写。实例记录由生命周期管理器持有，
//! 这里只缓存最近一次写入的副本，供其他配置段重写时使用。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::Storage;
use crate::module::instance::InstanceRecord;
use crate::utils::{CoreError, Result};

/// 配置对象的存储键
pub const CONFIG_KEY: &str = "config.json";

/// 虚拟设备的附加信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VdevInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// 未识别的字段，整体重写时原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 持久化的配置对象
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    #[serde(default)]
    pub controller: Map<String, Value>,

    #[serde(default)]
    pub vdev_info: BTreeMap<String, VdevInfo>,

    #[serde(default)]
    pub locations: Vec<Value>,

    #[serde(default)]
    pub profiles: Vec<Value>,

    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

/// 配置对象存取
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
    blob: RwLock<PersistedConfig>,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            blob: RwLock::new(PersistedConfig::default()),
        }
    }

    /// 从存储读取配置对象，返回其中的实例记录
    ///
    /// 配置对象不存在时视为空配置。
    pub async fn load(&self) -> Result<Vec<InstanceRecord>> {
        let mut config = match self.storage.load(CONFIG_KEY).await? {
            Some(value) => serde_json::from_value::<PersistedConfig>(value)
                .map_err(|e| CoreError::persistence(CONFIG_KEY, e))?,
            None => {
                debug!("配置对象不存在，使用空配置");
                PersistedConfig::default()
            }
        };

        config.instances.sort_by_key(|r| r.id);
        info!(
            instances = config.instances.len(),
            vdev_info = config.vdev_info.len(),
            "已加载控制器配置"
        );

        let instances = config.instances.clone();
        *self.blob.write().await = config;
        Ok(instances)
    }

    /// 以给定的实例记录重写整个配置对象
    pub async fn save_instances(&self, records: &[InstanceRecord]) -> Result<()> {
        let mut blob = self.blob.write().await;
        blob.instances = records.to_vec();
        self.write(&blob).await
    }

    /// 读取虚拟设备信息，不存在时返回空信息
    pub async fn vdev_info(&self, device_id: &str) -> VdevInfo {
        self.blob
            .read()
            .await
            .vdev_info
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 设置虚拟设备信息并重写配置对象
    pub async fn set_vdev_info(&self, device_id: &str, info: VdevInfo) -> Result<VdevInfo> {
        let mut blob = self.blob.write().await;
        blob.vdev_info.insert(device_id.to_string(), info.clone());
        self.write(&blob).await?;
        Ok(info)
    }

    /// 当前配置对象的副本
    pub async fn snapshot(&self) -> PersistedConfig {
        self.blob.read().await.clone()
    }

    async fn write(&self, blob: &PersistedConfig) -> Result<()> {
        let value = serde_json::to_value(blob).map_err(|e| CoreError::persistence(CONFIG_KEY, e))?;
        self.storage.save(CONFIG_KEY, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_blob_loads_empty() {
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.snapshot().await, PersistedConfig::default());
    }

    #[tokio::test]
    async fn test_load_keeps_other_sections_on_save() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                CONFIG_KEY,
                &json!({
                    "controller": {"name": "home"},
                    "locations": [{"id": 1, "title": "Kitchen"}],
                    "instances": [
                        {"id": 2, "moduleId": "b", "params": {}},
                        {"id": 1, "moduleId": "a", "params": {}}
                    ]
                }),
            )
            .await
            .unwrap();

        let store = ConfigStore::new(storage.clone());
        let records = store.load().await.unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

        store.save_instances(&records[..1]).await.unwrap();
        let saved = storage.snapshot(CONFIG_KEY).await.unwrap();
        assert_eq!(saved["controller"]["name"], "home");
        assert_eq!(saved["locations"][0]["title"], "Kitchen");
        assert_eq!(saved["instances"].as_array().unwrap().len(), 1);
        assert_eq!(saved["instances"][0]["moduleId"], "a");
    }

    #[tokio::test]
    async fn test_vdev_info_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        let store = ConfigStore::new(storage.clone());

        assert_eq!(store.vdev_info("dev-1").await, VdevInfo::default());

        let info = VdevInfo {
            device_type: Some("switchBinary".to_string()),
            tags: vec!["light".to_string()],
            ..Default::default()
        };
        store.set_vdev_info("dev-1", info.clone()).await.unwrap();

        assert_eq!(store.vdev_info("dev-1").await, info);
        assert_eq!(store.snapshot().await.vdev_info.len(), 1);
        let saved = storage.snapshot(CONFIG_KEY).await.unwrap();
        assert_eq!(saved["vdevInfo"]["dev-1"]["deviceType"], "switchBinary");
    }

    #[tokio::test]
    async fn test_vdev_info_keeps_unknown_keys_on_rewrite() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                CONFIG_KEY,
                &json!({
                    "vdevInfo": {
                        "dev-1": {"deviceType": "sensorMultilevel", "hidden": true, "order": {"rooms": 3}}
                    }
                }),
            )
            .await
            .unwrap();

        let store = ConfigStore::new(storage.clone());
        store.load().await.unwrap();
        let loaded = store.vdev_info("dev-1").await;
        assert_eq!(loaded.extra["hidden"], true);

        // 改写另一台设备时整体重写配置对象
        store
            .set_vdev_info("dev-2", VdevInfo::default())
            .await
            .unwrap();

        let saved = storage.snapshot(CONFIG_KEY).await.unwrap();
        assert_eq!(saved["vdevInfo"]["dev-1"]["hidden"], true);
        assert_eq!(saved["vdevInfo"]["dev-1"]["order"]["rooms"], 3);
        assert_eq!(saved["vdevInfo"]["dev-1"]["deviceType"], "sensorMultilevel");
        assert!(saved["vdevInfo"]["dev-1"].get("extra").is_none());
    }

    #[tokio::test]
    async fn test_invalid_blob_is_persistence_error() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(CONFIG_KEY, &json!({"instances": "not a list"}))
            .await
            .unwrap();

        let store = ConfigStore::new(storage);
        let err = store.load().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_saves(true);
        let store = ConfigStore::new(storage);

        let err = store.save_instances(&[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence { .. }));
    }
}
