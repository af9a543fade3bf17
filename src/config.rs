use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{SchedulingPolicy, DEFAULT_VENUES};
use crate::limits::MAX_PENDING_BOOKINGS;
use crate::slots::{GridError, SlotGrid};

/// Runtime settings, read from `VESPERS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub open_hour: u32,
    pub close_hour: u32,
    pub slot_minutes: u32,
    pub venues: Vec<String>,
    /// Switches public booking intake off.
    pub maintenance_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            open_hour: 8,
            close_hour: 17,
            slot_minutes: 90,
            venues: DEFAULT_VENUES.iter().map(|v| v.to_string()).collect(),
            maintenance_mode: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    Grid(GridError),
    NoVenues,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid {key}: {value:?}"),
            ConfigError::Grid(e) => write!(f, "invalid slot grid: {e}"),
            ConfigError::NoVenues => write!(f, "VESPERS_VENUES lists no venues"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<GridError> for ConfigError {
    fn from(e: GridError) -> Self {
        ConfigError::Grid(e)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let metrics_port = match lookup("VESPERS_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "VESPERS_METRICS_PORT",
                value,
            })?),
        };
        let venues = match lookup("VESPERS_VENUES") {
            None => defaults.venues,
            Some(list) => {
                let venues: Vec<String> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect();
                if venues.is_empty() {
                    return Err(ConfigError::NoVenues);
                }
                venues
            }
        };

        let config = Config {
            bind: lookup("VESPERS_BIND").unwrap_or(defaults.bind),
            port: parse(&lookup, "VESPERS_PORT", defaults.port)?,
            data_dir: lookup("VESPERS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port,
            compact_threshold: parse(&lookup, "VESPERS_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            open_hour: parse(&lookup, "VESPERS_OPEN_HOUR", defaults.open_hour)?,
            close_hour: parse(&lookup, "VESPERS_CLOSE_HOUR", defaults.close_hour)?,
            slot_minutes: parse(&lookup, "VESPERS_SLOT_MINUTES", defaults.slot_minutes)?,
            venues,
            maintenance_mode: parse_flag(&lookup, "VESPERS_MAINTENANCE_MODE")?,
        };
        // Surface a bad grid at startup rather than on first request.
        config.grid()?;
        Ok(config)
    }

    pub fn grid(&self) -> Result<SlotGrid, GridError> {
        SlotGrid::new(self.open_hour, self.close_hour, self.slot_minutes)
    }

    pub fn policy(&self) -> Result<SchedulingPolicy, ConfigError> {
        Ok(SchedulingPolicy {
            grid: self.grid()?,
            venues: self.venues.clone(),
            accepting_bookings: !self.maintenance_mode,
            max_pending_bookings: MAX_PENDING_BOOKINGS,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("vespers.wal")
    }
}
