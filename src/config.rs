use crate::entities::item::ItemRecord;
use crate::entities::item_types::{ItemType, DEFAULT_MAX_STACK};
use crate::persistence::autosave::AutosaveConfig;
use crate::persistence::codec::DEFAULT_MAX_FULL_BYTES;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const PERSISTENCE_CONFIG_FILE: &str = "persistence.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Validate,
    Inspect(u32),
}

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub command: Command,
    pub config_path: PathBuf,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err(
                "usage: playerstate <data-root> [validate|inspect <player-id>]".to_string(),
            );
        }

        let root = Path::new(&args[1]).to_path_buf();
        let command = match args.get(2).map(|value| value.as_str()) {
            None | Some("validate") => Command::Validate,
            Some("inspect") => {
                let raw = args
                    .get(3)
                    .ok_or_else(|| "inspect requires a player id".to_string())?;
                let id = raw
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("invalid player id '{}'", raw))?;
                Command::Inspect(id)
            }
            Some(other) => return Err(format!("unknown command '{}'", other)),
        };
        let config_path = std::env::var("PLAYERSTATE_CONFIG")
            .ok()
            .and_then(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(trimmed))
                }
            })
            .unwrap_or_else(|| root.join(PERSISTENCE_CONFIG_FILE));
        Ok(Self {
            root,
            command,
            config_path,
        })
    }
}

/// Tunables of the persistence core, read from `persistence.yaml`. Every
/// field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_full_bytes: usize,
    pub default_max_stack: u32,
    pub item_types: Vec<ItemType>,
    pub newcomer_grace_seconds: u64,
    pub starter_items: Vec<ItemRecord>,
    pub stage_delay_ticks: u64,
    pub cache_capacity: usize,
    pub autosave_interval_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_full_bytes: DEFAULT_MAX_FULL_BYTES,
            default_max_stack: DEFAULT_MAX_STACK,
            item_types: Vec::new(),
            newcomer_grace_seconds: 300,
            starter_items: Vec::new(),
            stage_delay_ticks: 2,
            cache_capacity: 256,
            autosave_interval_seconds: 0,
        }
    }
}

impl PersistenceConfig {
    /// Missing file means defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default().with_env_overrides())
            }
            Err(err) => {
                return Err(format!(
                    "persistence config read failed for {}: {}",
                    path.display(),
                    err
                ))
            }
        };
        Ok(Self::parse(&data)
            .map_err(|err| format!("persistence config {}: {}", path.display(), err))?
            .with_env_overrides())
    }

    pub fn parse(data: &str) -> Result<Self, String> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data).map_err(|err| err.to_string())
    }

    pub fn newcomer_grace_millis(&self) -> u64 {
        self.newcomer_grace_seconds.saturating_mul(1000)
    }

    pub fn autosave(&self) -> AutosaveConfig {
        AutosaveConfig {
            interval_seconds: self.autosave_interval_seconds,
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_u64("PLAYERSTATE_AUTOSAVE_SECS") {
            self.autosave_interval_seconds = value;
        }
        if let Some(value) = env_u64("PLAYERSTATE_STAGE_DELAY_TICKS") {
            self.stage_delay_ticks = value;
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            eprintln!("playerstate: invalid {} '{}', ignored", name, value);
            None
        }
    }
}
