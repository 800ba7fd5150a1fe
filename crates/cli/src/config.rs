//! CLI configuration
//!
//! Optional TOML file with executor and terminal tunables. Every field has
//! a default, so an absent or partial file is fine.
//!
//! ```toml
//! [executor]
//! statements_per_frame = 2000
//!
//! [terminal]
//! colors = true
//! ```

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub terminal: TerminalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// BASIC statements per host frame before the executor yields.
    pub statements_per_frame: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            statements_per_frame: qb_runtime::DEFAULT_STATEMENTS_PER_FRAME,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalConfig {
    /// Use ANSI colors for COLOR/CLS.
    pub colors: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig { colors: true }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("bad config {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.executor.statements_per_frame, 2000);
        assert!(c.terminal.colors);
    }

    #[test]
    fn test_partial_file() {
        let c: Config = toml::from_str("[executor]\nstatements_per_frame = 500\n").unwrap();
        assert_eq!(c.executor.statements_per_frame, 500);
        assert!(c.terminal.colors);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<Config>("[executor]\nbogus = 1\n").is_err());
    }
}
