use crate::error::CliError;
use engine_config::settings::ENV_PREFIX;
use std::{collections::BTreeMap, collections::HashMap, fs, path::Path};

const REDACTED: &str = "********";

/// Variables from the process environment, optionally topped up from a
/// `.env` file. Process variables win over file entries.
#[derive(Debug, Clone)]
pub struct EnvManager {
    vars: HashMap<String, String>,
    sensitive_patterns: Vec<&'static str>,
}

impl EnvManager {
    pub fn new() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            vars,
            sensitive_patterns: Self::default_sensitive_patterns(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CliError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read env file {}: {}", path.display(), e))
        })?;

        self.parse_env_content(&content)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Pipeline variables with sensitive values masked, sorted by key.
    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| {
                let shown = if self.is_sensitive(key) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect()
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.sensitive_patterns
            .iter()
            .any(|pattern| key.contains(pattern))
    }

    fn parse_env_content(&mut self, content: &str) -> Result<(), CliError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, value)) = line.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid env file: malformed line {} (expected KEY=VALUE)",
                    line_num + 1
                )));
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(CliError::Config(format!(
                    "Invalid env file: empty key at line {}",
                    line_num + 1
                )));
            }

            self.vars
                .entry(key.to_string())
                .or_insert_with(|| Self::unquote_value(value));
        }

        Ok(())
    }

    fn unquote_value(value: &str) -> String {
        let value = value.trim();
        for quote in ['"', '\''] {
            if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
                return value[1..value.len() - 1].to_string();
            }
        }
        value.to_string()
    }

    /// Keys containing any of these are masked. Connection URLs carry passwords.
    fn default_sensitive_patterns() -> Vec<&'static str> {
        vec![
            "password",
            "passwd",
            "secret",
            "token",
            "key",
            "credential",
            "private",
            "database_url",
            "identity",
        ]
    }
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new()
    }
}
