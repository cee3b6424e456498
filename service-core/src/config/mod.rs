use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::load_from("configuration")
    }

    /// Load from an optional file (format inferred from its extension),
    /// overridden by `APP__*` environment variables.
    pub fn load_from(file: &str) -> Result<Self, AppError> {
        let config = Cfg::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() -> Result<(), anyhow::Error> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "port = 9191")?;

        let path = file.path().to_string_lossy().to_string();
        let config = Config::load_from(&path)?;
        assert_eq!(config.port, 9191);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_default_port() -> Result<(), anyhow::Error> {
        let config = Config::load_from("/nonexistent/credential-service-config")?;
        assert_eq!(config.port, 8080);
        Ok(())
    }
}
