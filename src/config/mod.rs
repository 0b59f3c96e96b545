pub mod schema;
pub mod watcher;

use crate::driver::light::LightAnim;
use crate::driver::motor::MotorAnim;
use crate::driver::Animation;
use crate::error::{PropError, Result};
use schema::{AppConfig, SensorKind};
use std::path::Path;

/// Load and parse configuration from a TOML file.
///
/// # Errors
/// Returns `PropError::ConfigNotFound` if the file doesn't exist,
/// `PropError::Io` on read errors, `PropError::TomlParse` on syntax errors,
/// or `PropError::Config` on validation failures.
pub fn load(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(PropError::ConfigNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let content = expand_env_vars(&content);
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
    let bus = &config.bus;
    for (name, len) in [
        ("bus.show_input", bus.show_input),
        ("bus.net_send", bus.net_send),
        ("bus.audio", bus.audio),
        ("bus.light", bus.light),
        ("bus.motor", bus.motor),
        ("console.queue_len", config.console.queue_len),
    ] {
        if len == 0 {
            return Err(PropError::Config(format!("{name} must be at least 1")));
        }
    }

    if config.show.tick_ms == 0 {
        return Err(PropError::Config("show.tick_ms must be > 0".to_string()));
    }

    let det = &config.detector;
    if det.fps == 0 || det.fps > 1000 {
        return Err(PropError::Config("detector.fps must be 1-1000".to_string()));
    }
    if det.close_mm >= det.far_mm {
        return Err(PropError::Config(format!(
            "detector.close_mm ({}) must be below detector.far_mm ({})",
            det.close_mm, det.far_mm
        )));
    }
    if det.min_close_readings == 0 || det.min_far_readings == 0 {
        return Err(PropError::Config(
            "detector reading counts must be at least 1".to_string(),
        ));
    }
    if det.sensor == SensorKind::Scripted && det.readings.is_empty() {
        return Err(PropError::Config(
            "scripted sensor needs at least one reading".to_string(),
        ));
    }

    if config.light.fps == 0 || config.motor.fps == 0 {
        return Err(PropError::Config("driver fps must be > 0".to_string()));
    }
    if config.light.num_leds < 2 {
        return Err(PropError::Config("light.num_leds must be at least 2".to_string()));
    }
    if config.motor.min_us >= config.motor.max_us {
        return Err(PropError::Config("motor.min_us must be below motor.max_us".to_string()));
    }

    if config.tables.idle.is_empty() {
        return Err(PropError::Config("tables.idle must have at least one step".to_string()));
    }
    for (name, table) in [
        ("idle", &config.tables.idle),
        ("local", &config.tables.local),
        ("remote", &config.tables.remote),
    ] {
        for (row, step) in table.iter().enumerate() {
            if LightAnim::try_from(step.light).is_err() {
                return Err(PropError::Config(format!(
                    "tables.{name}[{row}]: light {} out of range (0-{})",
                    step.light,
                    LightAnim::COUNT - 1
                )));
            }
            if MotorAnim::try_from(step.motor).is_err() {
                return Err(PropError::Config(format!(
                    "tables.{name}[{row}]: motor {} out of range (0-{})",
                    step.motor,
                    MotorAnim::COUNT - 1
                )));
            }
        }
    }

    Ok(())
}
