use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AssistantError, Result};

/// Gmail's batchModify ceiling
pub const MAX_PROVIDER_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub processing_limits: ProcessingLimits,
    #[serde(default)]
    pub spam_detection: SpamDetectionConfig,
    #[serde(default)]
    pub unsubscribe_detection: UnsubscribeConfig,
    #[serde(default)]
    pub categorization: CategorizationConfig,
    #[serde(default)]
    pub ai_response: AiResponseConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLimits {
    #[serde(default = "default_max_emails_per_run")]
    pub max_emails_per_run: usize,
    #[serde(default = "default_max_drafts_per_run")]
    pub max_drafts_per_run: usize,
    #[serde(default = "default_max_processing_time_minutes")]
    pub max_processing_time_minutes: u64,
    /// Minimum spacing between provider calls
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            max_emails_per_run: default_max_emails_per_run(),
            max_drafts_per_run: default_max_drafts_per_run(),
            max_processing_time_minutes: default_max_processing_time_minutes(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Named spam-threshold preset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Score cutoff for a spam verdict. Lower means more aggressive.
    pub fn threshold(&self) -> f64 {
        match self {
            Sensitivity::Low => 0.8,
            Sensitivity::Medium => 0.6,
            Sensitivity::High => 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default = "default_spam_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_suspicious_domains")]
    pub suspicious_domains: Vec<String>,
}

impl Default for SpamDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: Sensitivity::default(),
            keywords: default_spam_keywords(),
            suspicious_domains: default_suspicious_domains(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_unsubscribe_keywords")]
    pub keywords: Vec<String>,
    /// Recognised but never acted on; see `Config::validate`
    #[serde(default)]
    pub auto_unsubscribe: bool,
    /// Record detected links as `unsubscribe_detected` activity for review
    #[serde(default = "default_true")]
    pub flag_for_review: bool,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: default_unsubscribe_keywords(),
            auto_unsubscribe: false,
            flag_for_review: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizationConfig {
    #[serde(default = "default_business_keywords")]
    pub business_keywords: Vec<String>,
    #[serde(default = "default_personal_keywords")]
    pub personal_keywords: Vec<String>,
    #[serde(default = "default_promotional_keywords")]
    pub promotional_keywords: Vec<String>,
    #[serde(default = "default_social_keywords")]
    pub social_keywords: Vec<String>,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            business_keywords: default_business_keywords(),
            personal_keywords: default_personal_keywords(),
            promotional_keywords: default_promotional_keywords(),
            social_keywords: default_social_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
    /// When set, drafts are only stored for approval and never pushed to the mailbox
    #[serde(default = "default_true")]
    pub require_approval: bool,
}

impl Default for AiResponseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            max_response_length: default_max_response_length(),
            require_approval: true,
        }
    }
}

/// Provider label identifiers applied per category. Opaque to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_personal_label")]
    pub personal: String,
    #[serde(default = "default_promotions_label")]
    pub promotions: String,
    #[serde(default = "default_social_label")]
    pub social: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            personal: default_personal_label(),
            promotions: default_promotions_label(),
            social: default_social_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    #[serde(default = "default_summary_dir")]
    pub summary_dir: PathBuf,
    /// Fetch window used when no successful run has been recorded yet
    #[serde(default = "default_lookback_hours")]
    pub default_lookback_hours: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            status_file: default_status_file(),
            summary_dir: default_summary_dir(),
            default_lookback_hours: default_lookback_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_emails_per_run() -> usize {
    100
}

fn default_max_drafts_per_run() -> usize {
    20
}

fn default_max_processing_time_minutes() -> u64 {
    30
}

fn default_rate_limit_delay_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_spam_keywords() -> Vec<String> {
    strings(&[
        "lottery",
        "winner",
        "congratulations",
        "claim now",
        "urgent",
        "limited time",
        "act now",
        "free money",
        "guaranteed",
        "no obligation",
        "risk free",
        "100% free",
        "click here now",
    ])
}

fn default_suspicious_domains() -> Vec<String> {
    strings(&["tempmail.org", "10minutemail.com", "guerrillamail.com"])
}

fn default_unsubscribe_keywords() -> Vec<String> {
    strings(&["unsubscribe", "opt out", "remove me", "stop emails"])
}

fn default_business_keywords() -> Vec<String> {
    strings(&["meeting", "project", "deadline", "invoice", "contract"])
}

fn default_personal_keywords() -> Vec<String> {
    strings(&["family", "friend", "birthday", "vacation", "personal"])
}

fn default_promotional_keywords() -> Vec<String> {
    strings(&["sale", "discount", "offer", "deal", "promotion"])
}

fn default_social_keywords() -> Vec<String> {
    strings(&["facebook", "twitter", "linkedin", "instagram", "notification"])
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_response_length() -> usize {
    500
}

fn default_personal_label() -> String {
    "CATEGORY_PERSONAL".to_string()
}

fn default_promotions_label() -> String {
    "CATEGORY_PROMOTIONS".to_string()
}

fn default_social_label() -> String {
    "CATEGORY_SOCIAL".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".gmail-assistant/assistant.db")
}

fn default_status_file() -> PathBuf {
    PathBuf::from(".gmail-assistant/status.json")
}

fn default_summary_dir() -> PathBuf {
    PathBuf::from(".gmail-assistant/summaries")
}

fn default_lookback_hours() -> i64 {
    8
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

impl Config {
    /// Load configuration. `.toml` files are parsed as TOML, anything else as JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AssistantError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config = Self::parse(&content, is_toml(path))?;
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    fn parse(content: &str, toml_format: bool) -> Result<Self> {
        if toml_format {
            toml::from_str(content).map_err(|e| {
                AssistantError::ConfigError(format!("Failed to parse config file: {}", e))
            })
        } else {
            serde_json::from_str(content).map_err(|e| {
                AssistantError::ConfigError(format!("Failed to parse config file: {}", e))
            })
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AssistantError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| {
                AssistantError::ConfigError(format!("Failed to serialize config: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self)?
        };

        tokio::fs::write(path, content)
            .await
            .map_err(|e| AssistantError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let limits = &self.processing_limits;
        if limits.max_emails_per_run == 0 {
            return Err(AssistantError::ConfigError(
                "processing_limits.max_emails_per_run must be at least 1".to_string(),
            ));
        }
        if limits.max_processing_time_minutes == 0 {
            return Err(AssistantError::ConfigError(
                "processing_limits.max_processing_time_minutes must be at least 1".to_string(),
            ));
        }
        if limits.batch_size == 0 {
            return Err(AssistantError::ConfigError(
                "processing_limits.batch_size must be at least 1".to_string(),
            ));
        }
        if limits.batch_size > MAX_PROVIDER_BATCH_SIZE {
            return Err(AssistantError::ConfigError(format!(
                "processing_limits.batch_size cannot exceed {} (Gmail batchModify limit)",
                MAX_PROVIDER_BATCH_SIZE
            )));
        }

        let threshold = self.ai_response.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AssistantError::ConfigError(format!(
                "ai_response.confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.ai_response.max_response_length == 0 {
            return Err(AssistantError::ConfigError(
                "ai_response.max_response_length must be greater than 0".to_string(),
            ));
        }

        if self.unsubscribe_detection.auto_unsubscribe {
            return Err(AssistantError::ConfigError(
                "unsubscribe_detection.auto_unsubscribe is not supported; use flag_for_review"
                    .to_string(),
            ));
        }

        for (name, value) in [
            ("labels.personal", &self.labels.personal),
            ("labels.promotions", &self.labels.promotions),
            ("labels.social", &self.labels.social),
        ] {
            if value.trim().is_empty() {
                return Err(AssistantError::ConfigError(format!("{} cannot be empty", name)));
            }
        }

        if self.storage.default_lookback_hours <= 0 {
            return Err(AssistantError::ConfigError(
                "storage.default_lookback_hours must be positive".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
