use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataflow::StageMapping;
use crate::domain::{Layer, PlannedStage};
use crate::engine::{EngineConfig, RetryPolicy};
use crate::feedback::FeedbackRule;
use crate::jobs::JobRegistryConfig;
use crate::monitor::MonitorConfig;
use crate::realtime::RealtimeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub topology: TopologyConfig,
    pub mappings: HashMap<usize, StageMapping>,
    pub providers: HashMap<String, ProviderEndpointConfig>,
    pub engine: EngineSection,
    pub jobs: JobsConfig,
    pub feedback: FeedbackConfig,
    pub realtime: RealtimeSection,
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("trellis"),
        }
    }
}

/// One stage in the configured pipeline topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub layer: Layer,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub stages: Vec<StageConfig>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageConfig {
                    name: "validate".to_string(),
                    layer: Layer::Bottom,
                    provider: "structural-validator".to_string(),
                },
                StageConfig {
                    name: "structure".to_string(),
                    layer: Layer::Middle,
                    provider: "semantic-structurer".to_string(),
                },
                StageConfig {
                    name: "enrich".to_string(),
                    layer: Layer::Top,
                    provider: "authority-enricher".to_string(),
                },
            ],
        }
    }
}

impl TopologyConfig {
    /// The stage plan jobs are created against.
    pub fn plan(&self) -> Vec<PlannedStage> {
        self.stages
            .iter()
            .map(|stage| PlannedStage {
                name: stage.name.clone(),
                layer: stage.layer,
                provider_ref: stage.provider.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpointConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for ProviderEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub provider_timeout_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30000,
            provider_timeout_ms: 30000,
        }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
            },
            provider_timeout_ms: self.provider_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub default_iteration_budget: u32,
    pub retention_ms: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_iteration_budget: 3,
            retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

impl JobsConfig {
    pub fn registry_config(&self) -> JobRegistryConfig {
        JobRegistryConfig {
            default_iteration_budget: self.default_iteration_budget,
            retention_ms: self.retention_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub rules: Vec<FeedbackRule>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            rules: vec![FeedbackRule {
                name: "low-trust-restructure".to_string(),
                layer: Layer::Top,
                trigger: crate::feedback::RuleTrigger::ScoreBelow {
                    field: "trust_score".to_string(),
                    threshold: 0.6,
                },
                rewind_to: 1,
                adjusted_input: Some(serde_json::json!({"strategy": "conservative"})),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub channel_capacity: usize,
    pub max_buffer_age_ms: i64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            max_buffer_age_ms: 30000,
        }
    }
}

impl RealtimeSection {
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            channel_capacity: self.channel_capacity,
            max_buffer_age_ms: self.max_buffer_age_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub window_ms: i64,
    pub degraded_failure_ratio: f64,
    pub min_samples: usize,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            window_ms: 5 * 60 * 1000,
            degraded_failure_ratio: 0.5,
            min_samples: 3,
        }
    }
}

impl MonitorSection {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            window_ms: self.window_ms,
            degraded_failure_ratio: self.degraded_failure_ratio,
            min_samples: self.min_samples,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            topology: TopologyConfig::default(),
            mappings: HashMap::new(),
            providers: HashMap::new(),
            engine: EngineSection::default(),
            jobs: JobsConfig::default(),
            feedback: FeedbackConfig::default(),
            realtime: RealtimeSection::default(),
            monitor: MonitorSection::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_has_three_layers() {
        let config = Config::default();
        let plan = config.topology.plan();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].layer, Layer::Bottom);
        assert_eq!(plan[1].layer, Layer::Middle);
        assert_eq!(plan[2].layer, Layer::Top);
    }

    #[test]
    fn test_parse_topology_and_mappings() {
        let yaml = r#"
topology:
  stages:
    - name: validate
      layer: bottom
      provider: structural-validator
    - name: enrich
      layer: top
      provider: authority-enricher
mappings:
  1:
    fields:
      - from: entities
        to: entities
        required: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.topology.stages.len(), 2);
        let mapping = config.mappings.get(&1).unwrap();
        assert_eq!(mapping.fields.len(), 1);
        assert!(mapping.fields[0].required);
    }

    #[test]
    fn test_parse_providers_section() {
        let yaml = r#"
providers:
  structural-validator:
    endpoint: http://localhost:9001/validate
    timeout_ms: 5000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let provider = config.providers.get("structural-validator").unwrap();

        assert_eq!(provider.endpoint, "http://localhost:9001/validate");
        assert_eq!(provider.timeout_ms, 5000);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.jobs.default_iteration_budget, 3);
        assert_eq!(config.feedback.rules.len(), 1);
    }

    #[test]
    fn test_engine_section_conversion() {
        let section = EngineSection {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            provider_timeout_ms: 2000,
        };
        let config = section.engine_config();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.provider_timeout_ms, 2000);
    }
}
