use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

pub const DEFAULT_REROUTE_TARGET: &str = "192.168.0.14";

/// Runtime settings for the core. Loaded from an optional TOML file, then
/// overridden by `PCRF_*` environment variables.
#[derive(Deserialize, Debug, Clone)]
pub struct PcrfConfig {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_reroute_target")]
    pub reroute_target: IpAddr,

    #[serde(default)]
    pub flow_table_id: i32,

    #[serde(default = "default_flow_priority")]
    pub flow_priority: i32,

    #[serde(default)]
    pub default_policy_data_cap: i64,

    #[serde(default = "default_policy_downlink")]
    pub default_policy_downlink: i64,

    #[serde(default = "default_policy_uplink")]
    pub default_policy_uplink: i64,

    #[serde(default)]
    pub default_policy_burst: i64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialPcrfConfig {
    database_url: Option<String>,
    max_connections: Option<u32>,
    log_dir: Option<String>,
    reroute_target: Option<IpAddr>,
    flow_table_id: Option<i32>,
    flow_priority: Option<i32>,
    default_policy_data_cap: Option<i64>,
    default_policy_downlink: Option<i64>,
    default_policy_uplink: Option<i64>,
    default_policy_burst: Option<i64>,
}

fn default_max_connections() -> u32 {
    10
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_reroute_target() -> IpAddr {
    IpAddr::from([192, 168, 0, 14])
}

fn default_flow_priority() -> i32 {
    100
}

fn default_policy_downlink() -> i64 {
    5000
}

fn default_policy_uplink() -> i64 {
    1000
}

impl PcrfConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => read_file_config(Path::new(path_str))?,
            None => PartialPcrfConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialPcrfConfig = envy::prefixed("PCRF_")
            .from_env::<PartialPcrfConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        merge(env_config, file_config)
    }

    /// All defaults, pointed at the given database.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        PcrfConfig {
            database_url: database_url.into(),
            max_connections: default_max_connections(),
            log_dir: default_log_dir(),
            reroute_target: default_reroute_target(),
            flow_table_id: 0,
            flow_priority: default_flow_priority(),
            default_policy_data_cap: 0,
            default_policy_downlink: default_policy_downlink(),
            default_policy_uplink: default_policy_uplink(),
            default_policy_burst: 0,
        }
    }

    fn validate(self) -> Result<Self, String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        let limits = [
            ("default_policy_data_cap", self.default_policy_data_cap),
            ("default_policy_downlink", self.default_policy_downlink),
            ("default_policy_uplink", self.default_policy_uplink),
            ("default_policy_burst", self.default_policy_burst),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v < 0) {
            return Err(format!("{name} must not be negative"));
        }
        Ok(self)
    }
}

fn read_file_config(path: &Path) -> Result<PartialPcrfConfig, String> {
    if !path.exists() {
        return Ok(PartialPcrfConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
    toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
}

fn merge(env: PartialPcrfConfig, file: PartialPcrfConfig) -> Result<PcrfConfig, String> {
    PcrfConfig {
        database_url: env
            .database_url
            .or(file.database_url)
            .ok_or("PCRF_DATABASE_URL is required")?,
        max_connections: env
            .max_connections
            .or(file.max_connections)
            .unwrap_or_else(default_max_connections),
        log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        reroute_target: env
            .reroute_target
            .or(file.reroute_target)
            .unwrap_or_else(default_reroute_target),
        flow_table_id: env.flow_table_id.or(file.flow_table_id).unwrap_or(0),
        flow_priority: env
            .flow_priority
            .or(file.flow_priority)
            .unwrap_or_else(default_flow_priority),
        default_policy_data_cap: env
            .default_policy_data_cap
            .or(file.default_policy_data_cap)
            .unwrap_or(0),
        default_policy_downlink: env
            .default_policy_downlink
            .or(file.default_policy_downlink)
            .unwrap_or_else(default_policy_downlink),
        default_policy_uplink: env
            .default_policy_uplink
            .or(file.default_policy_uplink)
            .unwrap_or_else(default_policy_uplink),
        default_policy_burst: env
            .default_policy_burst
            .or(file.default_policy_burst)
            .unwrap_or(0),
    }
    .validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_bootstrap_policy() {
        let config = PcrfConfig::for_database("sqlite::memory:");
        assert_eq!(config.default_policy_data_cap, 0);
        assert_eq!(config.default_policy_downlink, 5000);
        assert_eq!(config.default_policy_uplink, 1000);
        assert_eq!(config.reroute_target.to_string(), DEFAULT_REROUTE_TARGET);
        assert_eq!(config.flow_priority, 100);
        assert_eq!(config.flow_table_id, 0);
    }

    #[test]
    fn env_overrides_file() {
        let file = PartialPcrfConfig {
            database_url: Some("postgres://file".to_string()),
            flow_priority: Some(50),
            default_policy_downlink: Some(8000),
            ..Default::default()
        };
        let env = PartialPcrfConfig {
            database_url: Some("postgres://env".to_string()),
            ..Default::default()
        };

        let config = merge(env, file).unwrap();
        assert_eq!(config.database_url, "postgres://env");
        assert_eq!(config.flow_priority, 50);
        assert_eq!(config.default_policy_downlink, 8000);
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let err = merge(PartialPcrfConfig::default(), PartialPcrfConfig::default()).unwrap_err();
        assert!(err.contains("PCRF_DATABASE_URL"));
    }

    #[test]
    fn negative_limits_are_rejected() {
        let file = PartialPcrfConfig {
            database_url: Some("sqlite::memory:".to_string()),
            default_policy_uplink: Some(-1),
            ..Default::default()
        };
        let err = merge(PartialPcrfConfig::default(), file).unwrap_err();
        assert!(err.contains("default_policy_uplink"));
    }

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url = \"sqlite://pcrf.db\"\nreroute_target = \"10.10.0.1\"\nflow_table_id = 2"
        )
        .unwrap();

        let partial = read_file_config(file.path()).unwrap();
        let config = merge(PartialPcrfConfig::default(), partial).unwrap();
        assert_eq!(config.database_url, "sqlite://pcrf.db");
        assert_eq!(config.reroute_target, "10.10.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.flow_table_id, 2);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let partial = read_file_config(Path::new("/nonexistent/pcrf.toml")).unwrap();
        assert!(partial.database_url.is_none());
    }
}
