//! API server configuration

use config::{Config, ConfigError, Environment, File, FileFormat};
use delivery_db::DbConfig;
use delivery_maps::MapsConfig;
use delivery_tracker::SimulationConfig;
use serde::Deserialize;

/// Optional configuration file, looked up next to the working directory
const CONFIG_FILE: &str = "delivery";

/// Environment variable prefix, e.g. `DELIVERY__API_PORT=8080`
const ENV_PREFIX: &str = "DELIVERY";

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST API port
    pub api_port: u16,
    /// Enable CORS for all origins (development)
    pub cors_permissive: bool,
    /// Seed a demo warehouse, orders and batch into the in-memory store
    pub seed_demo_data: bool,
    /// Batch store
    pub db: DbConfig,
    /// Mapping provider
    pub maps: MapsConfig,
    /// Simulation loop
    pub simulation: SimulationConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_port: 3000,
            cors_permissive: true,
            seed_demo_data: true,
            db: DbConfig::default(),
            maps: MapsConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load configuration: defaults, then `delivery.toml`, then `DELIVERY__*` variables
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("db.hosts")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
