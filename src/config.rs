use crate::history::DEFAULT_RECENT_POINTS_CAPACITY;
use crate::zone::{DEFAULT_CATCH_ALL_ID, Rect, Zone, ZoneError, ZoneLayout};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub history: Option<HistorySection>,
    pub zones: ZonesSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
    /// Records buffered per stream before the controller blocks (default: 1)
    pub stream_channel_capacity: Option<usize>,
    /// Stream sources must resolve inside this directory (default: unrestricted)
    pub replay_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistorySection {
    /// Heatmap points kept per zone (default: 1000)
    pub recent_points_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZonesSection {
    /// Zone that receives every point outside the configured regions
    pub catch_all: Option<String>,
    pub catch_all_threshold: Option<u32>,
    #[serde(default)]
    pub regions: Vec<RegionSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegionSettings {
    pub id: String,
    /// `[x1, y1, x2, y2]` in frame pixels
    pub rect: [f64; 4],
    pub threshold: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid zone configuration: {0}")]
    Zone(#[from] ZoneError),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Validate the configured regions into a layout; fails on any bad zone.
    pub fn zone_layout(&self) -> Result<ZoneLayout, ConfigError> {
        let zones = self
            .zones
            .regions
            .iter()
            .map(|region| {
                let [x1, y1, x2, y2] = region.rect;
                Zone {
                    id: region.id.clone(),
                    rect: Rect::new(x1, y1, x2, y2),
                    threshold: region.threshold,
                }
            })
            .collect();
        let catch_all = self
            .zones
            .catch_all
            .clone()
            .unwrap_or_else(|| DEFAULT_CATCH_ALL_ID.to_string());

        let layout = ZoneLayout::new(zones, catch_all)?;
        match self.zones.catch_all_threshold {
            Some(threshold) => Ok(layout.with_catch_all_threshold(threshold)?),
            None => Ok(layout),
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn stream_channel_capacity(&self) -> usize {
        self.server
            .as_ref()
            .and_then(|s| s.stream_channel_capacity)
            .unwrap_or(DEFAULT_STREAM_CHANNEL_CAPACITY)
            .max(1)
    }

    pub fn replay_dir(&self) -> Option<&Path> {
        self.server.as_ref().and_then(|s| s.replay_dir.as_deref())
    }

    pub fn recent_points_capacity(&self) -> usize {
        self.history
            .as_ref()
            .and_then(|h| h.recent_points_capacity)
            .unwrap_or(DEFAULT_RECENT_POINTS_CAPACITY)
            .max(1)
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(
        prefix: &str,
        contents: &str,
    ) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("{prefix}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn default_config_builds_two_zone_layout() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        let layout = config.zone_layout()?;

        let ids: Vec<&str> = layout.zone_ids().collect();
        assert_eq!(ids, vec!["Zone 1", "Zone 2"]);
        assert_eq!(layout.threshold("Zone 1"), Some(11));
        assert_eq!(config.recent_points_capacity(), 1000);
        Ok(())
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "crowd-flow-config-minimal",
            r#"
[app]
name = "crowd-flow"

[logging]
level = "debug"

[zones]
[[zones.regions]]
id = "door"
rect = [0.0, 0.0, 100.0, 100.0]
threshold = 4
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.stream_channel_capacity(), 1);
        assert_eq!(config.recent_points_capacity(), DEFAULT_RECENT_POINTS_CAPACITY);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.replay_dir(), None);
        assert_eq!(config.zone_layout()?.catch_all(), DEFAULT_CATCH_ALL_ID);
        Ok(())
    }

    #[test]
    fn replay_dir_is_read_from_server_section() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "crowd-flow-config-replay-dir",
            r#"
[app]
name = "crowd-flow"

[logging]
level = "info"

[server]
replay_dir = "/srv/replays"

[zones]
[[zones.regions]]
id = "door"
rect = [0.0, 0.0, 100.0, 100.0]
threshold = 4
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.replay_dir(), Some(Path::new("/srv/replays")));
        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        Ok(())
    }

    #[test]
    fn zero_threshold_fails_fast() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "crowd-flow-config-zero-threshold",
            r#"
[app]
name = "crowd-flow"

[logging]
level = "info"

[zones]
catch_all = "rest"

[[zones.regions]]
id = "door"
rect = [0.0, 0.0, 100.0, 100.0]
threshold = 0
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(
            config.zone_layout(),
            Err(ConfigError::Zone(ZoneError::InvalidThreshold(id))) if id == "door"
        ));
        Ok(())
    }

    #[test]
    fn missing_regions_fail_fast() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "crowd-flow-config-no-regions",
            r#"
[app]
name = "crowd-flow"

[logging]
level = "info"

[zones]
catch_all = "rest"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(
            config.zone_layout(),
            Err(ConfigError::Zone(ZoneError::Empty))
        ));
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("crowd-flow-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config("crowd-flow-config-invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
