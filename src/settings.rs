use std::fs;
use std::path::Path;

use crate::error::AppError;
use crate::style_images::{BatchEntry, ImageConfig, ImageDescriptor, ImagePerformanceProfile};

/// 读取图片配置文件。
///
/// 文件是 `ImageConfig` 的 camelCase JSON，缺省字段取默认值；可额外带一个
/// `performanceProfile` 键（`quality` / `balanced` / `speed`），在其余字段之后应用。
pub fn load_image_config(path: &Path) -> Result<ImageConfig, AppError> {
    let content = fs::read_to_string(path)?;
    parse_image_config(&content)
}

pub fn parse_image_config(content: &str) -> Result<ImageConfig, AppError> {
    let value = serde_json::from_str::<serde_json::Value>(content)
        .map_err(|e| AppError::Settings(format!("解析配置文件失败: {}", e)))?;

    let profile = match value.get("performanceProfile") {
        Some(serde_json::Value::String(name)) => Some(ImagePerformanceProfile::from_str(name)?),
        Some(other) => {
            return Err(AppError::Settings(format!("performanceProfile 必须是字符串: {}", other)));
        }
        None => None,
    };

    let mut config = serde_json::from_value::<ImageConfig>(value)
        .map_err(|e| AppError::Settings(format!("配置字段不合法: {}", e)))?;
    if let Some(profile) = profile {
        config.apply_performance_profile(profile);
    }

    config.validate()?;
    Ok(config)
}

/// 读取批量描述文件：`{ "name": { "sourceUri": "...", "info": { ... } } }`。
///
/// 返回顺序与文件中的书写顺序一致。
pub fn load_batch(path: &Path) -> Result<Vec<(String, ImageDescriptor)>, AppError> {
    let content = fs::read_to_string(path)?;
    parse_batch(&content)
}

pub fn parse_batch(content: &str) -> Result<Vec<(String, ImageDescriptor)>, AppError> {
    let entries = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(content)
        .map_err(|e| AppError::Settings(format!("解析批量描述失败: {}", e)))?;

    entries
        .into_iter()
        .map(|(name, value)| {
            let entry = serde_json::from_value::<BatchEntry>(value)
                .map_err(|e| AppError::Settings(format!("批量条目 {} 不合法: {}", name, e)))?;
            let descriptor = entry.into_descriptor(&name);
            Ok((name, descriptor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style_images::AnimationMode;

    #[test]
    fn config_profile_key_is_applied_after_fields() {
        let config = parse_image_config(r#"{ "animationMode": "simple", "performanceProfile": "speed" }"#)
            .expect("config should parse");

        assert_eq!(config.animation_mode, AnimationMode::Simple);
        assert_eq!(config.infer_performance_profile(), ImagePerformanceProfile::Speed);
    }

    #[test]
    fn config_rejects_unknown_profile() {
        let result = parse_image_config(r#"{ "performanceProfile": "turbo" }"#);
        assert!(matches!(result, Err(AppError::Image(_))));
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let result = parse_image_config(r#"{ "frameIntervalMs": 0 }"#);
        assert!(matches!(result, Err(AppError::Image(_))));
    }

    #[test]
    fn batch_entries_keep_metadata() {
        let batch = parse_batch(
            r#"{
                "pin": { "sourceUri": "/tmp/pin.png", "info": { "sdf": true, "scale": 2.0 } },
                "anim": { "sourceUri": "https://host/a.gif" }
            }"#,
        )
        .expect("batch should parse");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].1.name, "pin");
        assert!(batch[0].1.info.sdf);
        assert_eq!(batch[0].1.info.scale, 2.0);
        assert_eq!(batch[1].0, "anim");
        assert_eq!(batch[1].1.info.scale, 1.0);
    }

    #[test]
    fn batch_keeps_file_order() {
        let batch = parse_batch(
            r#"{
                "zebra": { "sourceUri": "/tmp/z.png" },
                "alpha": { "sourceUri": "/tmp/a.png" },
                "mango": { "sourceUri": "/tmp/m.png" }
            }"#,
        )
        .expect("batch should parse");

        let names: Vec<&str> = batch.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zebra", "alpha", "mango"]);
    }

    #[test]
    fn batch_requires_source_uri() {
        let result = parse_batch(r#"{ "pin": { "info": {} } }"#);
        assert!(matches!(result, Err(AppError::Settings(_))));
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let dir = tempfile::tempdir().expect("create temp dir failed");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "maxRedirects": 2 }"#).expect("write config failed");

        let config = load_image_config(&path).expect("config should load");
        assert_eq!(config.max_redirects, 2);
    }
}
