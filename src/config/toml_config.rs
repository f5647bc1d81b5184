use crate::utils::error::{PostexError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const API_KEY_ENV: &str = "POSTEX_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub carrier: CarrierConfig,
    pub shipping: ShippingConfig,
    pub learning: LearningConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarrierConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub document_timeout_seconds: u64,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.postex.pk/".to_string(),
            api_key: None,
            timeout_seconds: 20,
            document_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingConfig {
    pub pickup_address_code: String,
    pub default_weight: f64,
    pub default_dimensions: String,
    pub next_ref_number: u64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            pickup_address_code: String::new(),
            default_weight: 0.5,
            default_dimensions: "15x10x5".to_string(),
            next_ref_number: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_hours: u64,
    pub window_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_hours: 12,
            window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: Option<String>,
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PostexError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PostexError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Loads `path` when it exists and falls back to defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 替換環境變數 (例如 ${POSTEX_API_KEY})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| PostexError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Settles the API key once, highest precedence first:
    /// 1. `cli_key` (the `--api-key` flag)
    /// 2. `env_key` (the `POSTEX_API_KEY` variable)
    /// 3. `[carrier] api_key` from the file
    ///
    /// An unsubstituted `${VAR}` placeholder left in the file counts as unset.
    pub fn resolve_api_key(&mut self, cli_key: Option<String>, env_key: Option<String>) {
        let usable = |key: &Option<String>| {
            key.as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty() && !k.starts_with("${"))
                .map(str::to_string)
        };

        let resolved = usable(&cli_key)
            .map(|k| (k, "command line"))
            .or_else(|| usable(&env_key).map(|k| (k, API_KEY_ENV)))
            .or_else(|| usable(&self.carrier.api_key).map(|k| (k, "config file")));

        match resolved {
            Some((key, source)) => {
                tracing::debug!("Using PostEx API key from {}", source);
                self.carrier.api_key = Some(key);
            }
            None => self.carrier.api_key = None,
        }
    }

    /// Booking needs a key and a pickup address on top of the general checks.
    pub fn validate_for_booking(&self) -> Result<()> {
        self.validate()?;
        validation::validate_required_field("carrier.api_key", &self.carrier.api_key)?;
        if self.shipping.pickup_address_code.trim().is_empty() {
            return Err(PostexError::MissingConfigError {
                field: "shipping.pickup_address_code".to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("carrier.base_url", &self.carrier.base_url)?;
        validation::validate_range("carrier.timeout_seconds", self.carrier.timeout_seconds, 1, 300)?;
        validation::validate_range(
            "carrier.document_timeout_seconds",
            self.carrier.document_timeout_seconds,
            1,
            300,
        )?;
        validation::validate_path("storage.data_dir", &self.storage.data_dir)?;
        validation::validate_range("sync.interval_hours", self.sync.interval_hours, 1, 24 * 7)?;
        validation::validate_range("sync.window_days", self.sync.window_days, 1, 30)?;

        if !(self.shipping.default_weight.is_finite() && self.shipping.default_weight > 0.0) {
            return Err(PostexError::InvalidConfigValueError {
                field: "shipping.default_weight".to_string(),
                value: self.shipping.default_weight.to_string(),
                reason: "Weight must be greater than zero".to_string(),
            });
        }

        self.shipping
            .default_dimensions
            .parse::<crate::domain::model::Dimensions>()
            .map_err(|e| PostexError::InvalidConfigValueError {
                field: "shipping.default_dimensions".to_string(),
                value: self.shipping.default_dimensions.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[carrier]
base_url = "https://api.postex.pk/"
api_key = "file-key"
timeout_seconds = 15

[shipping]
pickup_address_code = "002"
default_weight = 1.0
default_dimensions = "20x10x10"
next_ref_number = 5000

[learning]
enabled = false

[sync]
interval_hours = 6

[storage]
data_dir = "/var/lib/postex"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.carrier.api_key.as_deref(), Some("file-key"));
        assert_eq!(config.carrier.timeout_seconds, 15);
        assert_eq!(config.carrier.document_timeout_seconds, 30);
        assert_eq!(config.shipping.pickup_address_code, "002");
        assert_eq!(config.shipping.next_ref_number, 5000);
        assert!(!config.learning.enabled);
        assert_eq!(config.sync.interval_hours, 6);
        assert_eq!(config.sync.window_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.carrier.base_url, "https://api.postex.pk/");
        assert_eq!(config.shipping.default_dimensions, "15x10x5");
        assert!(config.learning.enabled);
        assert_eq!(config.sync.interval_hours, 12);
        assert!(config.validate().is_ok());
        assert!(config.validate_for_booking().is_err());
    }

    #[test]
    fn test_retired_shipping_keys_are_ignored() {
        let config = AppConfig::from_toml_str(
            r#"
[shipping]
pickup_address_code = "002"
pickup_city = "Lahore"
"#,
        )
        .unwrap();
        assert_eq!(config.shipping.pickup_address_code, "002");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TEST_POSTEX_BASE_URL", "https://staging.postex.test/");

        let config = AppConfig::from_toml_str(
            r#"
[carrier]
base_url = "${TEST_POSTEX_BASE_URL}"
"#,
        )
        .unwrap();
        assert_eq!(config.carrier.base_url, "https://staging.postex.test/");

        std::env::remove_var("TEST_POSTEX_BASE_URL");
    }

    #[test]
    fn test_api_key_precedence() {
        let mut config = AppConfig::from_toml_str(
            r#"
[carrier]
api_key = "file-key"
"#,
        )
        .unwrap();

        let mut from_cli = config.clone();
        from_cli.resolve_api_key(Some("cli-key".into()), Some("env-key".into()));
        assert_eq!(from_cli.carrier.api_key.as_deref(), Some("cli-key"));

        let mut from_env = config.clone();
        from_env.resolve_api_key(None, Some("env-key".into()));
        assert_eq!(from_env.carrier.api_key.as_deref(), Some("env-key"));

        config.resolve_api_key(Some("  ".into()), None);
        assert_eq!(config.carrier.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn test_unresolved_placeholder_counts_as_missing_key() {
        let mut config = AppConfig::from_toml_str(
            r#"
[carrier]
api_key = "${SURELY_NOT_SET_POSTEX_KEY}"
"#,
        )
        .unwrap();
        config.resolve_api_key(None, None);
        assert!(config.carrier.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let config = AppConfig::from_toml_str(
            r#"
[carrier]
base_url = "invalid-url"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str(
            r#"
[shipping]
default_dimensions = "ten by five"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(PostexError::InvalidConfigValueError { ref field, .. }) if field == "shipping.default_dimensions"
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[shipping]\npickup_address_code = \"009\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.shipping.pickup_address_code, "009");

        let missing = AppConfig::load_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(missing.shipping.pickup_address_code, "");
    }
}
