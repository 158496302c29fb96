//! 模块元数据解析器
//!
//! 从模块目录读取 `module.json`（优先）或 `module.yaml` 并校验。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::module::metadata::ModuleMetadata;
use crate::utils::{CoreError, Result};

/// JSON 描述文件名
pub const METADATA_JSON: &str = "module.json";

/// YAML 描述文件名
pub const METADATA_YAML: &str = "module.yaml";

/// 模块元数据解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 查找模块目录中的描述文件，`module.json` 优先
    pub fn find_metadata_file(module_dir: &Path) -> Option<PathBuf> {
        [METADATA_JSON, METADATA_YAML]
            .iter()
            .map(|name| module_dir.join(name))
            .find(|path| path.is_file())
    }

    /// 解析模块目录
    ///
    /// 描述文件中省略 `id` 时取目录名；给出时必须与目录名一致。
    ///
    /// # Errors
    ///
    /// 目录中没有描述文件、文件不可读或内容无效时返回
    /// `CoreError::ModuleMetadata`。
    pub async fn parse_dir(module_dir: &Path) -> Result<ModuleMetadata> {
        let dir_name = module_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let path = Self::find_metadata_file(module_dir).ok_or_else(|| CoreError::ModuleMetadata {
            module_id: dir_name.clone(),
            reason: format!("{} 中没有 {} 或 {}", module_dir.display(), METADATA_JSON, METADATA_YAML),
        })?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ModuleMetadata {
                module_id: dir_name.clone(),
                reason: format!("无法读取 {}: {}", path.display(), e),
            })?;

        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        Self::parse_str(&content, is_json, &dir_name)
    }

    /// 从字符串解析并校验元数据
    ///
    /// `dir_name` 是模块目录名，即模块的注册 ID。
    pub fn parse_str(content: &str, is_json: bool, dir_name: &str) -> Result<ModuleMetadata> {
        let parsed = if is_json {
            serde_json::from_str::<ModuleMetadata>(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str::<ModuleMetadata>(content).map_err(|e| e.to_string())
        };
        let mut metadata = parsed.map_err(|reason| CoreError::ModuleMetadata {
            module_id: dir_name.to_string(),
            reason: format!("描述文件格式错误: {}", reason),
        })?;

        if metadata.id.is_empty() {
            metadata.id = dir_name.to_string();
        } else if metadata.id != dir_name {
            return Err(CoreError::ModuleMetadata {
                module_id: dir_name.to_string(),
                reason: format!("描述文件中的 id '{}' 与目录名不一致", metadata.id),
            });
        }

        Self::validate(&metadata)?;
        Ok(metadata)
    }

    /// 校验模块元数据
    ///
    /// - ID 格式：字母开头，只包含字母、数字、下划线和连字符
    /// - 依赖 ID 非空、不重复、不依赖自身
    /// - 版本号（如有）符合 semver
    pub fn validate(metadata: &ModuleMetadata) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !Self::is_valid_module_id(&metadata.id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，只允许字母开头的字母、数字、下划线和连字符",
                metadata.id
            ));
        }

        let mut seen = HashSet::new();
        for (index, dep) in metadata.dependencies.iter().enumerate() {
            if dep.trim().is_empty() {
                errors.push(format!("第 {} 个依赖的模块 ID 不能为空", index + 1));
            } else if !seen.insert(dep.as_str()) {
                errors.push(format!("依赖 '{}' 重复声明", dep));
            } else if dep == &metadata.id {
                errors.push("模块不能依赖自身".to_string());
            }
        }

        if let Some(ref version) = metadata.version {
            if semver::Version::parse(version).is_err() {
                errors.push(format!(
                    "无效的版本号格式 '{}', 请使用 semver 格式 (如 1.0.0)",
                    version
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ModuleMetadata {
                module_id: metadata.id.clone(),
                reason: errors.join("; "),
            })
        }
    }

    /// 检查模块 ID 格式是否有效
    pub fn is_valid_module_id(id: &str) -> bool {
        let mut chars = id.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_json_defaults_id_to_dir() {
        let metadata =
            ModuleParser::parse_str(r#"{"dependencies": ["Cron"], "singleton": true}"#, true, "Scenes")
                .unwrap();
        assert_eq!(metadata.id, "Scenes");
        assert_eq!(metadata.dependencies, vec!["Cron"]);
        assert!(metadata.singleton);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = "id: Cron\nversion: 1.2.0\ntitle: Cron scheduler\nskip: true\n";
        let metadata = ModuleParser::parse_str(yaml, false, "Cron").unwrap();
        assert!(metadata.skip);
        assert_eq!(metadata.version.as_deref(), Some("1.2.0"));
        assert_eq!(metadata.title.as_deref(), Some("Cron scheduler"));
    }

    #[test]
    fn test_id_must_match_dir() {
        let result = ModuleParser::parse_str(r#"{"id": "Other"}"#, true, "Cron");
        assert!(matches!(result, Err(CoreError::ModuleMetadata { .. })));
    }

    #[test]
    fn test_malformed_content() {
        let result = ModuleParser::parse_str("{not json", true, "Cron");
        match result {
            Err(CoreError::ModuleMetadata { module_id, .. }) => assert_eq!(module_id, "Cron"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_dependencies() {
        let dup = ModuleMetadata::new("A").with_dependencies(["B", "B"]);
        assert!(ModuleParser::validate(&dup).is_err());

        let empty = ModuleMetadata::new("A").with_dependencies([""]);
        assert!(ModuleParser::validate(&empty).is_err());

        let own = ModuleMetadata::new("A").with_dependencies(["A"]);
        assert!(ModuleParser::validate(&own).is_err());

        let ok = ModuleMetadata::new("A").with_dependencies(["B", "C"]);
        assert!(ModuleParser::validate(&ok).is_ok());
    }

    #[test]
    fn test_validate_version() {
        let mut metadata = ModuleMetadata::new("A");
        metadata.version = Some("one".to_string());
        assert!(ModuleParser::validate(&metadata).is_err());
    }

    #[test]
    fn test_module_id_format() {
        assert!(ModuleParser::is_valid_module_id("ZWave"));
        assert!(ModuleParser::is_valid_module_id("my-module_2"));
        assert!(!ModuleParser::is_valid_module_id("2fast"));
        assert!(!ModuleParser::is_valid_module_id(""));
        assert!(!ModuleParser::is_valid_module_id("a.b"));
    }

    #[tokio::test]
    async fn test_parse_dir_prefers_json() {
        let dir = TempDir::new().unwrap();
        let module_dir = dir.path().join("Cron");
        tokio::fs::create_dir(&module_dir).await.unwrap();
        tokio::fs::write(module_dir.join(METADATA_JSON), r#"{"singleton": true}"#)
            .await
            .unwrap();
        tokio::fs::write(module_dir.join(METADATA_YAML), "singleton: false\n")
            .await
            .unwrap();

        let metadata = ModuleParser::parse_dir(&module_dir).await.unwrap();
        assert_eq!(metadata.id, "Cron");
        assert!(metadata.singleton);
    }

    #[tokio::test]
    async fn test_parse_dir_without_metadata() {
        let dir = TempDir::new().unwrap();
        let result = ModuleParser::parse_dir(dir.path()).await;
        assert!(matches!(result, Err(CoreError::ModuleMetadata { .. })));
    }
}
