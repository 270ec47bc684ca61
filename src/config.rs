//! YAML configuration for the collector, loaded at start-up.

use std::path::Path;

use li_export::ConfigError;
use serde::{Deserialize, Serialize};

/// Top-level collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// ≤16 bytes, stamped into every exported record's PS-PDU header.
    pub operatorid: String,
    /// ≤16 bytes.
    pub networkelemid: String,
    /// ≤8 bytes.
    pub interceptpointid: String,
    pub provisionerip: String,
    pub provisionerport: String,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    /// Ceiling on bytes buffered for a mediator with no confirmed
    /// address yet (see [`li_export::mediator::DEFAULT_UNANNOUNCED_BUFFER_CEILING`]).
    #[serde(default = "CollectorConfig::default_max_unannounced_buffer_bytes")]
    pub max_unannounced_buffer_bytes: usize,
}

/// One capture input source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    pub uri: String,
    #[serde(default = "InputConfig::default_threads")]
    pub threads: usize,
}

impl InputConfig {
    fn default_threads() -> usize {
        1
    }
}

impl CollectorConfig {
    fn default_max_unannounced_buffer_bytes() -> usize {
        64 * 1024 * 1024
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_len("operatorid", &self.operatorid, 16)?;
        check_len("networkelemid", &self.networkelemid, 16)?;
        check_len("interceptpointid", &self.interceptpointid, 8)?;
        if self.inputs.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        Ok(())
    }

    pub fn default_example() -> Self {
        CollectorConfig {
            operatorid: "OPERATOR1".into(),
            networkelemid: "NE1".into(),
            interceptpointid: "IPT1".into(),
            provisionerip: "127.0.0.1".into(),
            provisionerport: "9001".into(),
            inputs: vec![InputConfig {
                uri: "pcapfile:///var/log/openli/capture.pcap".into(),
                threads: 2,
            }],
            max_unannounced_buffer_bytes: Self::default_max_unannounced_buffer_bytes(),
        }
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ConfigError> {
    if value.len() > max {
        return Err(ConfigError::FieldTooLong {
            field,
            max,
            actual: value.len(),
        });
    }
    Ok(())
}
