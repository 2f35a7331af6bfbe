use std::path::Path;

use serde::{Deserialize, Serialize};

use castpanel_captioning::CaptioningConfig;

/// HTTP listener settings for the operator/overlay API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8900,
        }
    }
}

/// Application settings: server surface plus the captioning subsystem config
/// produced by the settings UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub captioning: CaptioningConfig,
}

impl Settings {
    /// Loads settings from an optional TOML file layered under `CASTPANEL_*`
    /// environment overrides (e.g. `CASTPANEL_SERVER__PORT=9000`).
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("CASTPANEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
