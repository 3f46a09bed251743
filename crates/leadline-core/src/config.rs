use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{LeadContext, TenantRecord};
use leadline_error::{LeadlineError, Result};

/// 配置文件路径的环境变量覆盖
pub const CONFIG_PATH_ENV: &str = "LEADLINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerCfg,
    pub chat_provider: ChatCfg,
    pub embedding_provider: EmbedCfg,
    pub vector_store: VectorStoreCfg,
    #[serde(default)]
    pub retrieval: RetrievalCfg,
    #[serde(default)]
    pub data: DataCfg,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCfg {
    pub kind: String,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbedCfg {
    pub kind: String,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreCfg {
    /// qdrant | memory
    pub kind: String,
    pub url: Option<String>,
    pub api_key_env: Option<String>,
    pub collection: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalCfg {
    pub top_k: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalCfg {
    fn default() -> Self {
        Self {
            top_k: 5,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataCfg {
    pub clinic_path: String,
    /// memory 模式下启动时把诊所数据写入索引
    pub seed_on_start: bool,
}

impl Default for DataCfg {
    fn default() -> Self {
        Self {
            clinic_path: "data/clinic.yaml".into(),
            seed_on_start: false,
        }
    }
}

/// 诊所数据文件：租户档案 + 默认线索
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClinicData {
    pub clinic: TenantRecord,
    pub lead: LeadContext,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).map_err(|e| LeadlineError::Configuration {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let cfg: AppConfig = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

pub fn load_clinic_data(path: impl AsRef<Path>) -> Result<ClinicData> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).map_err(|e| LeadlineError::Configuration {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let data: ClinicData = serde_yaml::from_str(&s)?;
    if data.lead.clinic_id != data.clinic.clinic_id {
        return Err(LeadlineError::Configuration {
            key: "lead.clinic_id".into(),
            reason: format!(
                "lead belongs to {} but clinic is {}",
                data.lead.clinic_id, data.clinic.clinic_id
            ),
        });
    }
    Ok(data)
}

pub fn read_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LeadlineError::Configuration {
        key: key.to_string(),
        reason: "environment variable not set".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLINIC_YAML: &str = r#"
clinic:
  clinic_id: clinic-a
  name: Bright Smiles Dental Clinic
  description: Comprehensive dental care.
  services:
    - id: svc_003
      title: Teeth Whitening
      description: Cosmetic whitening treatment to brighten your smile.
      price: 200
  opening_hours:
    monday: "08:30 - 17:00"
  languages_spoken: [English, Polish]
  payment_methods: [Cash]
lead:
  first_name: John
  treatment: Invisalign
  mobile: "+447911123456"
  clinic_id: clinic-a
  submitted_at: "2025-08-01T10:00:00Z"
"#;

    #[test]
    fn test_parse_config_applies_defaults() {
        let yaml = r#"
chat_provider:
  kind: openai_compat
embedding_provider:
  kind: openai_compat
vector_store:
  kind: memory
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.chat_provider.model, "gpt-4o");
        assert!((cfg.chat_provider.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.embedding_provider.model, "text-embedding-3-small");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.data.clinic_path, "data/clinic.yaml");
    }

    #[test]
    fn test_parse_clinic_data_fills_closed_days() {
        let data: ClinicData = serde_yaml::from_str(CLINIC_YAML).unwrap();
        assert_eq!(data.clinic.services.len(), 1);
        assert_eq!(data.clinic.opening_hours.monday, "08:30 - 17:00");
        assert_eq!(data.clinic.opening_hours.sunday, "Closed");
        assert_eq!(data.lead.first_name, "John");
    }

    #[test]
    fn test_load_clinic_data_rejects_foreign_lead() {
        let dir = std::env::temp_dir().join(format!("leadline-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clinic.yaml");
        std::fs::write(&path, CLINIC_YAML.replace("  clinic_id: clinic-a\n  submitted", "  clinic_id: clinic-b\n  submitted")).unwrap();
        let err = load_clinic_data(&path).unwrap_err();
        assert!(matches!(err, LeadlineError::Configuration { .. }));

        std::fs::write(&path, CLINIC_YAML).unwrap();
        assert!(load_clinic_data(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shipped_files_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let cfg = load_config(root.join(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(cfg.vector_store.kind, "qdrant");

        let data = load_clinic_data(root.join(&cfg.data.clinic_path)).unwrap();
        assert_eq!(data.clinic.services.len(), 4);
        assert_eq!(data.clinic.opening_hours.sunday, "Closed");
        assert_eq!(data.clinic.opening_hours.friday, "08:30 - 16:00");
        assert_eq!(data.lead.clinic_id, data.clinic.clinic_id);
    }

    #[test]
    fn test_read_env_missing() {
        let err = read_env("LEADLINE_TEST_DEFINITELY_UNSET").unwrap_err();
        assert!(matches!(err, LeadlineError::Configuration { .. }));
    }
}
