//! 配置集成测试
//!
//! 测试配置文件加载、命令行覆盖合并，以及配置驱动的日志和模块扫描

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use automation_core::{
    AutomationController, CoreConfig, CoreError, LoggerConfig, MemoryStorage, RotationStrategy,
};
use common::{write_module, CountingActivator};
use serde_json::json;
use tempfile::TempDir;

/// 测试系统配置文件与命令行覆盖的合并流程
#[tokio::test]
async fn test_file_then_override_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("core.yaml");
    tokio::fs::write(
        &config_path,
        r#"
logging:
  level: info
  file_output: true
  log_dir: /var/log/automation
  rotation: hourly
modules:
  module_dirs:
    - /opt/automation/modules
events:
  handler_timeout_ms: 2000
"#,
    )
    .await
    .unwrap();

    let mut config = CoreConfig::from_file(&config_path).await.unwrap();
    assert_eq!(config.config_path.as_ref(), Some(&config_path));

    // 命令行参数只覆盖显式给出的值
    let overrides = CoreConfig::builder().log_level("trace").dev_mode().build();
    config.merge(overrides);

    assert_eq!(config.logging.level, "trace");
    assert!(config.dev_mode);
    assert_eq!(
        config.modules.module_dirs,
        vec![PathBuf::from("/opt/automation/modules")]
    );
    assert_eq!(config.events.handler_timeout_ms, 2000);
    assert!(config.validate().is_ok());

    let logger = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger.level, "trace");
    assert_eq!(logger.rotation, RotationStrategy::Hourly);
    assert_eq!(logger.file_output, Some(PathBuf::from("/var/log/automation")));
}

/// 测试未开启文件输出时忽略日志目录
#[tokio::test]
async fn test_log_dir_ignored_without_file_output() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("core.yaml");
    tokio::fs::write(
        &config_path,
        "logging:\n  log_dir: /tmp/ignored\n  rotation: sometimes\n",
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();
    let logger = LoggerConfig::from_log_config(&config.logging);

    assert!(logger.file_output.is_none());
    assert_eq!(logger.rotation, RotationStrategy::Daily);
    assert!("sometimes".parse::<RotationStrategy>().is_err());
}

/// 测试格式错误的配置文件
#[tokio::test]
async fn test_malformed_files_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let yaml_path = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&yaml_path, "modules: [unclosed").await.unwrap();
    assert!(CoreConfig::from_file(&yaml_path).await.is_err());

    let json_path = temp_dir.path().join("broken.json");
    tokio::fs::write(&json_path, "{\"modules\": ").await.unwrap();
    assert!(CoreConfig::from_file(&json_path).await.is_err());

    let empty_dirs = temp_dir.path().join("empty.json");
    tokio::fs::write(&empty_dirs, r#"{"modules": {"module_dirs": []}}"#)
        .await
        .unwrap();
    match CoreConfig::from_file(&empty_dirs).await {
        Err(CoreError::InvalidConfigValue { key, .. }) => assert_eq!(key, "modules.module_dirs"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

/// 测试模块目录按配置顺序扫描，后出现的重复模块被拒绝
#[tokio::test]
async fn test_module_dirs_scanned_in_configured_order() {
    let root = TempDir::new().unwrap();
    let system = root.path().join("system");
    let user = root.path().join("user");
    write_module(&system, "Cron", json!({"version": "1.0.0"})).await;
    write_module(&user, "Cron", json!({"version": "2.0.0"})).await;
    write_module(&user, "Weather", json!({})).await;

    let config = CoreConfig::builder()
        .module_dirs([system.clone(), user.clone()])
        .data_dir(root.path().join("storage"))
        .build();
    let controller = AutomationController::new(
        config,
        Arc::new(CountingActivator::new()),
        Arc::new(MemoryStorage::new()),
    );
    controller.init().await.unwrap();

    let modules = controller.modules().await;
    let ids: Vec<&str> = modules.iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec!["Cron", "Weather"]);
    assert_eq!(modules[0].location, system.join("Cron"));
    assert_eq!(controller.notifications(0, None).await.len(), 1);
}
