use std::{env, fs, path::Path, str::FromStr, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_TARGET_DOMAIN: &str = "fixupx.com";
pub const DEFAULT_OWNERSHIP_CAPACITY: usize = 10_000;
pub const DEFAULT_OWNERSHIP_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Which retraction controls are offered on relayed messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetractMode {
    Reaction,
    Button,
    Both,
}

impl RetractMode {
    pub fn reactions_enabled(self) -> bool {
        matches!(self, RetractMode::Reaction | RetractMode::Both)
    }

    pub fn buttons_enabled(self) -> bool {
        matches!(self, RetractMode::Button | RetractMode::Both)
    }
}

impl FromStr for RetractMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "reaction" | "reactions" => Ok(RetractMode::Reaction),
            "button" | "buttons" => Ok(RetractMode::Button),
            "both" | "" => Ok(RetractMode::Both),
            other => Err(Error::Config(format!(
                "FIXUP_RETRACT_MODE must be one of reaction, button, both (got {other:?})"
            ))),
        }
    }
}

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,

    // Rewriting
    pub target_domain: String,

    // Retraction
    pub retract_mode: RetractMode,
    pub ownership_capacity: usize,
    pub ownership_ttl: Duration,

    // Webhooks
    pub webhook_name: Option<String>,
    pub serialize_webhook_creation: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build the config from an arbitrary key lookup (the process env in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("DISCORD_TOKEN environment variable is required".to_string())
            })?;

        let target_domain = lookup("FIXUP_TARGET_DOMAIN")
            .and_then(non_empty)
            .map(|d| d.trim().trim_end_matches('/').to_lowercase())
            .unwrap_or_else(|| DEFAULT_TARGET_DOMAIN.to_string());
        if target_domain.contains('/') || target_domain.contains(char::is_whitespace) {
            return Err(Error::Config(format!(
                "FIXUP_TARGET_DOMAIN must be a bare host name (got {target_domain:?})"
            )));
        }

        let retract_mode = match lookup("FIXUP_RETRACT_MODE") {
            Some(v) => v.parse()?,
            None => RetractMode::Both,
        };

        let ownership_capacity = lookup("FIXUP_OWNERSHIP_CAPACITY")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_OWNERSHIP_CAPACITY);
        let ownership_ttl = lookup("FIXUP_OWNERSHIP_TTL_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_OWNERSHIP_TTL);

        let webhook_name = lookup("FIXUP_WEBHOOK_NAME").and_then(non_empty);
        let serialize_webhook_creation = lookup("FIXUP_SERIALIZE_WEBHOOKS")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);

        Ok(Self {
            discord_token,
            target_domain,
            retract_mode,
            ownership_capacity,
            ownership_ttl,
            webhook_name,
            serialize_webhook_creation,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
