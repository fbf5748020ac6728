//! TOML configuration parsing and validation.
//!
//! The pipeline is configured from a single TOML file. Stage sections are
//! optional; a missing section means the stage does not run. Validation of
//! cross-field constraints (an enabled stage pointing at a geometry file
//! that does not exist) happens in [`load_config`], before any tickets are
//! processed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PipelineError;
use crate::reprocess::SkipRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Abort the batch on a framework-level error (storage invariant
    /// violation). Per-ticket failures never trigger this.
    #[serde(default)]
    pub fail_fast: bool,
    /// Export a results snapshot after each stage.
    #[serde(default)]
    pub save_intermediate: bool,
    #[serde(default)]
    pub stages: StagesConfig,
    /// City reference points, keyed case-insensitively by (city, county).
    #[serde(default)]
    pub cities: Vec<CityRef>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Location of the SQLite cache database.
    pub db_path: PathBuf,
}

/// A known city reference point.
#[derive(Debug, Deserialize, Clone)]
pub struct CityRef {
    pub city: String,
    pub county: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StagesConfig {
    #[serde(default)]
    pub proximity: Option<ProximityStageConfig>,
    #[serde(default)]
    pub validation: Option<ValidationStageConfig>,
    #[serde(default)]
    pub enrichment: Option<EnrichmentStageConfig>,
}

/// Configuration for the proximity geocoding stage.
#[derive(Debug, Deserialize, Clone)]
pub struct ProximityStageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub skip_rules: SkipRules,
    /// GeoJSON road network for the county.
    pub road_network_path: PathBuf,
    /// Threshold for the city-distance sanity check, in kilometers.
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
}

/// Configuration for the re-validation stage.
#[derive(Debug, Deserialize, Clone)]
pub struct ValidationStageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub skip_rules: SkipRules,
    /// Rule names to enable; empty means every registered rule.
    #[serde(default)]
    pub validation_rules: Vec<String>,
    #[serde(default)]
    pub route: Option<RouteConfig>,
}

/// Route corridor geometry and buffer.
#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    pub geometry_path: PathBuf,
    #[serde(default = "default_buffer_m")]
    pub buffer_m: f64,
}

/// Configuration for the pipeline-proximity enrichment stage.
#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentStageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub skip_rules: SkipRules,
    #[serde(default)]
    pub pipeline: Option<PipelineGeometryConfig>,
}

/// Known pipeline geometry, boost radius, and mismatch threshold.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineGeometryConfig {
    pub geometry_path: PathBuf,
    #[serde(default = "default_boost_radius_m")]
    pub boost_radius_m: f64,
    #[serde(default = "default_mismatch_threshold_m")]
    pub mismatch_threshold_m: f64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./outputs")
}

fn default_true() -> bool {
    true
}

fn default_max_distance_km() -> f64 {
    50.0
}

fn default_buffer_m() -> f64 {
    500.0
}

fn default_boost_radius_m() -> f64 {
    500.0
}

fn default_mismatch_threshold_m() -> f64 {
    500.0
}

impl Config {
    /// City reference points as (UPPERCASE city, UPPERCASE county) → (lat, lng).
    pub fn city_map(&self) -> BTreeMap<(String, String), (f64, f64)> {
        self.cities
            .iter()
            .map(|c| {
                (
                    (
                        c.city.trim().to_uppercase(),
                        c.county.trim().to_uppercase(),
                    ),
                    (c.lat, c.lng),
                )
            })
            .collect()
    }
}

/// Load and validate a configuration file.
///
/// Returns [`PipelineError::Configuration`] when the file cannot be read or
/// parsed, or when an enabled stage references a geometry file that does
/// not exist.
pub fn load_config(path: &Path) -> Result<Config, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Configuration(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        PipelineError::Configuration(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), PipelineError> {
    if let Some(proximity) = &config.stages.proximity {
        if proximity.enabled && !proximity.road_network_path.exists() {
            return Err(PipelineError::Configuration(format!(
                "proximity stage enabled but road network file not found: {}",
                proximity.road_network_path.display()
            )));
        }
        if proximity.max_distance_km <= 0.0 {
            return Err(PipelineError::Configuration(
                "proximity.max_distance_km must be positive".into(),
            ));
        }
    }

    if let Some(validation) = &config.stages.validation {
        if validation.enabled {
            if let Some(route) = &validation.route {
                if !route.geometry_path.exists() {
                    return Err(PipelineError::Configuration(format!(
                        "validation stage enabled but route geometry not found: {}",
                        route.geometry_path.display()
                    )));
                }
            }
        }
    }

    if let Some(enrichment) = &config.stages.enrichment {
        if enrichment.enabled {
            if let Some(pipeline) = &enrichment.pipeline {
                if !pipeline.geometry_path.exists() {
                    return Err(PipelineError::Configuration(format!(
                        "enrichment stage enabled but pipeline geometry not found: {}",
                        pipeline.geometry_path.display()
                    )));
                }
            }
        }
    }

    Ok(())
}
