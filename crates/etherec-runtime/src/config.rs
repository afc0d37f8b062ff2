//! Configuration loader
//!
//! INI-style text: `[section]` headers followed by `key = value` lines,
//! flattened into `section.key` lookups. Comments start with `;` or `#`.
//! Typed getters parse with `FromStr` and fall back to the caller's
//! default, so missing or malformed values never abort startup.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Flat `section.key -> value` tree
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// An empty configuration (every getter returns its default)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and parse a config file
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parse config text
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        let mut section = String::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_lowercase();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                let value = value.trim().to_string();
                let full = if section.is_empty() {
                    key
                } else {
                    format!("{}.{}", section, key)
                };
                values.insert(full, value);
            }
        }

        Self { values }
    }

    /// Get `key` parsed as `T`, or the default
    pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get `key` parsed as `T` if present and well-formed
    pub fn get_opt<T: FromStr>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| v.parse().ok())
    }

    /// Get `key` as a string, or the default
    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Get `key` as a boolean; accepts 1/true/yes/on (case-insensitive)
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }

    /// Whether the key is present at all
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Worker labels listed in `debug.suppress_threads`, comma-separated
    pub fn suppressed_threads(&self) -> Vec<String> {
        self.get_str("debug.suppress_threads", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
