use cadence_core::dispatch::DispatchConfig;
use cadence_core::models::MaterializationConfig;
use cadence_core::timezone::parse_timezone;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

pub const CONFIG_FILE: &str = "cadence.toml";

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// Whose tasks this CLI works on; a single-user install never sets it
    pub owner_id: Uuid,
    /// Default IANA timezone for new tasks and for listing
    pub timezone: String,
    /// Directory the calendar's .ics files are written to
    pub calendar_dir: PathBuf,
    pub materialization: MaterializationConfig,
    pub sync: DispatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("cadence.db"),
            owner_id: Uuid::nil(),
            timezone: "UTC".to_string(),
            calendar_dir: PathBuf::from("calendar"),
            materialization: MaterializationConfig::default(),
            sync: DispatchConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }

    pub fn tz(&self) -> anyhow::Result<Tz> {
        Ok(parse_timezone(&self.timezone)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = Config::new()?;
            assert_eq!(config.database_path, PathBuf::from("cadence.db"));
            assert_eq!(config.timezone, "UTC");
            assert_eq!(config.owner_id, Uuid::nil());
            assert_eq!(config.materialization.default_horizon_days, 14);
            assert_eq!(config.sync.grace_period_ms, 5_000);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                timezone = "Europe/Berlin"
                calendar_dir = "cal"

                [materialization]
                default_horizon_days = 30
                "#,
            )?;
            jail.set_env("CADENCE_TIMEZONE", "Asia/Tokyo");
            jail.set_env("CADENCE_SYNC__GRACE_PERIOD_MS", "0");

            let config = Config::new()?;
            assert_eq!(config.timezone, "Asia/Tokyo");
            assert_eq!(config.calendar_dir, PathBuf::from("cal"));
            assert_eq!(config.materialization.default_horizon_days, 30);
            assert_eq!(config.materialization.max_occurrences, 366);
            assert_eq!(config.sync.grace_period_ms, 0);
            assert_eq!(config.sync.max_attempts, 4);
            Ok(())
        });
    }
}
