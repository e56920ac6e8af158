use crate::protocol::Size;
use serde::Deserialize;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,

    /// Enables the label feature when present.
    #[serde(default)]
    pub label: Option<LabelConfig>,

    /// Enables the display (image) feature when present.
    #[serde(default)]
    pub display: Option<DisplayConfig>,

    /// Enables grid resizing when present.
    #[serde(default)]
    pub custom_grid: Option<CustomGridConfig>,

    /// Extra device-specific feature names to advertise.
    #[serde(default)]
    pub custom_features: Vec<String>,
}

/// Device identity and server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Stable device id reported in metadata.
    #[serde(default = "default_device_id")]
    pub id: String,

    /// Device type id reported in metadata.
    #[serde(default = "default_type_id")]
    pub type_id: String,

    /// Address the RPC server listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Initial button grid.
    #[serde(default = "default_grid")]
    pub grid: Size,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    /// Longest label in characters.
    #[serde(default = "default_max_length")]
    pub max_length: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Native button image size.
    #[serde(default = "default_resolution")]
    pub preferred_resolution: Size,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomGridConfig {
    #[serde(default = "default_min_grid")]
    pub min: Size,

    #[serde(default = "default_max_grid")]
    pub max: Size,
}

// --- Defaults ---

fn default_device_id() -> String {
    "virtual-01".to_string()
}

fn default_type_id() -> String {
    concat!("opendeck/virtual-", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8020".to_string()
}

fn default_grid() -> Size {
    Size::new(4, 3)
}

fn default_max_length() -> u32 {
    20
}

fn default_resolution() -> Size {
    Size::new(72, 72)
}

fn default_min_grid() -> Size {
    Size::new(1, 1)
}

fn default_max_grid() -> Size {
    Size::new(8, 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[device]
id = "desk-left"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.id, "desk-left");
        assert_eq!(config.device.grid, Size::new(4, 3));
        assert_eq!(config.device.listen, "127.0.0.1:8020");
        assert!(config.label.is_none());
        assert!(config.display.is_none());
        assert!(config.custom_grid.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
custom_features = ["haptics"]

[device]
id = "desk-left"
type_id = "opendeck/virtual"
listen = "0.0.0.0:9000"
grid = { width = 5, height = 3 }

[label]
max_length = 12

[display]
preferred_resolution = { width = 96, height = 96 }

[custom_grid]
min = { width = 2, height = 2 }
max = { width = 8, height = 4 }
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.grid, Size::new(5, 3));
        assert_eq!(config.label.unwrap().max_length, 12);
        assert_eq!(
            config.display.unwrap().preferred_resolution,
            Size::new(96, 96)
        );
        let grid = config.custom_grid.unwrap();
        assert_eq!(grid.min, Size::new(2, 2));
        assert_eq!(grid.max, Size::new(8, 4));
        assert_eq!(config.custom_features, vec!["haptics".to_string()]);
    }

    #[test]
    fn empty_feature_tables_use_defaults() {
        let toml_str = r#"
[device]

[label]

[custom_grid]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.label.unwrap().max_length, 20);
        assert_eq!(config.custom_grid.unwrap().max, Size::new(8, 8));
    }
}
