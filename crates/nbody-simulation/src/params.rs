//! Simulation configuration and the kernel parameter block

use crate::error::ConfigError;
use bytemuck::{Pod, Zeroable};
use nbody_physics::{ForceModel, SeedPolicy, DEFAULT_PARTICLE_COUNT, DEFAULT_TIMESTEP};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional JSON config file
pub const CONFIG_ENV_VAR: &str = "NBODY_CONFIG";

/// Default watchdog for device waits
pub const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 2000;

/// Where the kernels execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Gpu,
    Cpu,
}

/// Startup configuration, constant for the process lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub particle_count: u32,
    pub timestep: f32,
    pub seed: SeedPolicy,
    pub force_model: ForceModel,
    /// `None` waits on the device forever
    pub device_timeout_ms: Option<u64>,
    pub backend: Backend,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            timestep: DEFAULT_TIMESTEP,
            seed: SeedPolicy::default(),
            force_model: ForceModel::default(),
            device_timeout_ms: Some(DEFAULT_DEVICE_TIMEOUT_MS),
            backend: Backend::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from the file named by `NBODY_CONFIG`, or defaults when it is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                log::info!("Loading config from {}", Path::new(&path).display());
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::Invalid(
                "particle_count must be a positive integer".into(),
            ));
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "timestep must be a positive float, got {}",
                self.timestep
            )));
        }
        if self.device_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "device_timeout_ms must be positive or null".into(),
            ));
        }
        Ok(())
    }

    pub fn device_timeout(&self) -> Option<Duration> {
        self.device_timeout_ms.map(Duration::from_millis)
    }
}

/// Uniform block shared by both kernels (matches `SimParams` in WGSL)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub dt: f32,
    pub particle_count: u32,
    /// `ForceModel` discriminant
    pub force_model: u32,
    pub _padding: u32,
}

impl SimParams {
    pub fn new(dt: f32, particle_count: u32, force_model: ForceModel) -> Self {
        Self {
            dt,
            particle_count,
            force_model: force_model as u32,
            _padding: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.particle_count, 10_000);
        assert_eq!(config.timestep, 0.0001);
        assert_eq!(config.force_model, ForceModel::LowerIndex);
        assert_eq!(config.backend, Backend::Gpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulationConfig::from_json(r#"{"particle_count": 2048}"#).unwrap();
        assert_eq!(config.particle_count, 2048);
        assert_eq!(config.timestep, DEFAULT_TIMESTEP);
        assert_eq!(config.seed, SeedPolicy::default());
    }

    #[test]
    fn test_full_json() {
        let config = SimulationConfig::from_json(
            r#"{
                "particle_count": 16,
                "timestep": 0.5,
                "seed": "entropy",
                "force_model": "symmetric",
                "device_timeout_ms": null,
                "backend": "cpu"
            }"#,
        )
        .unwrap();
        assert_eq!(config.seed, SeedPolicy::Entropy);
        assert_eq!(config.force_model, ForceModel::Symmetric);
        assert_eq!(config.device_timeout(), None);
        assert_eq!(config.backend, Backend::Cpu);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            SimulationConfig::from_json(r#"{"particle_count": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json(r#"{"timestep": -1.0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json(r#"{"timestep": 0.0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json(r#"{"particle_count": -5}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = SimulationConfig::load("/nonexistent/nbody.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<SimParams>(), 16);
        let params = SimParams::new(0.25, 8, ForceModel::Symmetric);
        assert_eq!(params.force_model, 1);
    }
}
