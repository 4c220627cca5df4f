use std::env;

use crate::config::ConfigError;

const PLACEHOLDER_PREFIXES: &[&str] = &[
    "your-",
    "your_",
    "changeme",
    "change-me",
    "change_me",
    "replace-me",
    "replace_me",
    "placeholder",
];

// Only the whole value counts; `todo_items` is a legitimate collection id.
const PLACEHOLDER_WORDS: &[&str] = &["xxx", "todo", "tbd"];

/// Reads a required identifier and rejects empty or template-looking values.
pub(crate) fn require_identifier(key: &str) -> Result<String, ConfigError> {
    let value = optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))?;
    if looks_like_placeholder(&value) {
        return Err(ConfigError::PlaceholderValue(key.to_string()));
    }
    Ok(value)
}

pub(crate) fn looks_like_placeholder(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.starts_with('<') && normalized.ends_with('>') {
        return true;
    }
    if normalized.starts_with("${") {
        return true;
    }

    PLACEHOLDER_WORDS.contains(&normalized.as_str())
        || PLACEHOLDER_PREFIXES.iter().any(|prefix| {
            normalized.starts_with(prefix) || normalized == prefix.trim_end_matches(['-', '_'])
        })
}

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_f32_env(key: &str, default: f32) -> Result<f32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ConfigError::InvalidConfiguration(format!("{key} must be a number"))),
        None => Ok(default),
    }
}

pub(crate) fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => {
            let normalized = raw.to_ascii_lowercase();
            match normalized.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::ParseBool(key.to_string())),
            }
        }
        None => Ok(default),
    }
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
