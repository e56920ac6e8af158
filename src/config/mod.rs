pub mod schema;

use crate::error::{DeviceError, Result};
use schema::AppConfig;
use std::path::Path;

/// Load and parse configuration from a TOML file.
///
/// # Errors
/// Returns `DeviceError::ConfigNotFound` if the file doesn't exist,
/// `DeviceError::Io` on read errors, `DeviceError::TomlParse` on syntax errors,
/// or `DeviceError::Config` on validation failures.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(DeviceError::ConfigNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate configuration from a TOML string.
///
/// # Errors
/// Returns `DeviceError::TomlParse` or `DeviceError::Config`.
pub fn parse(content: &str) -> Result<AppConfig> {
    let content = expand_env_vars(content);
    let config: AppConfig = toml::from_str(&content)?;

    validate(&config)?;
    Ok(config)
}

/// Expand `${VAR}` and `$VAR` patterns in the config string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    // Keep original if env var not found
                    use std::fmt::Write;
                    let _ = write!(result, "${{{var_name}}}");
                }
            } else {
                let mut var_name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        var_name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                } else {
                    result.push('$');
                    result.push_str(&var_name);
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Validate config constraints.
fn validate(config: &AppConfig) -> Result<()> {
    if config.device.id.trim().is_empty() {
        return Err(DeviceError::Config("device.id must not be empty".to_string()));
    }
    if config.device.type_id.trim().is_empty() {
        return Err(DeviceError::Config(
            "device.type_id must not be empty".to_string(),
        ));
    }

    if let Some(label) = &config.label {
        if label.max_length == 0 {
            return Err(DeviceError::Config(
                "label.max_length must be at least 1".to_string(),
            ));
        }
    }

    if let Some(grid) = &config.custom_grid {
        if grid.min.width > grid.max.width || grid.min.height > grid.max.height {
            return Err(DeviceError::Config(format!(
                "custom_grid.min {} exceeds custom_grid.max {}",
                grid.min, grid.max
            )));
        }
        let initial = config.device.grid;
        if initial.clamp(grid.min, grid.max) != initial {
            return Err(DeviceError::Config(format!(
                "device.grid {initial} outside custom_grid bounds {}..{}",
                grid.min, grid.max
            )));
        }
    }

    Ok(())
}
