use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Settings read from the `--config` TOML file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Default bounded-projection width for `replay` of list logs.
    pub window: Option<usize>,
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
