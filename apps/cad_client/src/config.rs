use std::path::Path;

use cad_runtime::{SessionConfig, TransportPreference};
use cad_schema::{SchemaError, Validatable};

/// Command-line values that win over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub target_fps: Option<u32>,
    pub transport: Option<TransportPreference>,
    pub log_level: Option<String>,
}

/// Load the session config from `path` (defaults when absent), then apply
/// overrides and re-run validation so they obey the same rules
pub fn load_session_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<SessionConfig, SchemaError> {
    let mut config = match path {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(fps) = overrides.target_fps {
        if !(1..=240).contains(&fps) {
            return Err(SchemaError::InvalidValue {
                field: "target_fps".to_string(),
                reason: format!("{} is outside 1..=240", fps),
            });
        }
        config.target_fps = fps;
    }
    if let Some(transport) = overrides.transport {
        config.transport = transport;
    }
    if let Some(level) = &overrides.log_level {
        if cad_log::parse_level(level).is_none() {
            return Err(SchemaError::InvalidValue {
                field: "log_level".to_string(),
                reason: format!("unknown level '{}'", level),
            });
        }
        config.log_level = level.to_ascii_lowercase();
    }

    config.check()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_session_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_file_then_overrides() {
        let file = config_file(r#"{ "target_fps": 30, "transport": "message", "draw_slot_bytes": "64K" }"#);
        let overrides = ConfigOverrides {
            target_fps: Some(20),
            log_level: Some("DEBUG".into()),
            ..Default::default()
        };

        let config = load_session_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.target_fps, 20);
        assert_eq!(config.transport, TransportPreference::Message);
        assert_eq!(config.draw_slot_bytes.as_bytes(), 64 * 1024);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let file = config_file(r#"{ "target_fps": 0, "colour": "red" }"#);
        assert!(load_session_config(Some(file.path()), &ConfigOverrides::default()).is_err());
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let fps = ConfigOverrides { target_fps: Some(1000), ..Default::default() };
        assert!(load_session_config(None, &fps).is_err());

        let level = ConfigOverrides { log_level: Some("loud".into()), ..Default::default() };
        assert!(load_session_config(None, &level).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = Path::new("/nonexistent/cadence.json");
        assert!(matches!(
            load_session_config(Some(path), &ConfigOverrides::default()),
            Err(SchemaError::IoError(..))
        ));
    }
}
