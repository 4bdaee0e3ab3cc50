use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "engine.json";

fn default_call_timeout_secs() -> u64 {
    15
}

fn default_bus_capacity() -> usize {
    64
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: String::new(),
            api_key: String::new(),
            call_timeout_secs: default_call_timeout_secs(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smart-bookmarks")
    }

    /// Missing file yields defaults; a malformed file is an error, not
    /// something to silently paper over.
    pub fn load(dir: &Path) -> Result<Self, String> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let data =
            fs::read_to_string(&path).map_err(|e| format!("read {}: {}", CONFIG_FILE, e))?;
        serde_json::from_str(&data).map_err(|e| format!("parse {}: {}", CONFIG_FILE, e))
    }

    pub fn save(&self, dir: &Path) -> Result<(), String> {
        fs::create_dir_all(dir).map_err(|e| format!("create config dir: {}", e))?;
        let path = dir.join(CONFIG_FILE);
        let tmp = path.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(self).map_err(|e| format!("serialize: {}", e))?;
        fs::write(&tmp, json).map_err(|e| format!("write tmp: {}", e))?;
        fs::rename(&tmp, &path).map_err(|e| format!("rename: {}", e))?;
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
