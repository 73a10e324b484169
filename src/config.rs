use anyhow::{Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_ASSISTANT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_ASSISTANT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_api_key: Option<String>,
    pub assistant_url: String,
    pub assistant_model: String,
    pub use_mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings_file: Option<PathBuf>,
    /// Re-run the full original command after a successful install.
    pub rerun_after_install: bool,
    /// Ask before calling the assistant.
    pub confirm_assistant: bool,
    pub verbose: bool,
    /// Keys this version does not know about; written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    diagnostic: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant_api_key: None,
            assistant_url: DEFAULT_ASSISTANT_URL.to_string(),
            assistant_model: DEFAULT_ASSISTANT_MODEL.to_string(),
            use_mock: false,
            mappings_file: None,
            rerun_after_install: true,
            confirm_assistant: true,
            verbose: false,
            extra: serde_json::Map::new(),
            diagnostic: None,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::get_config_path()?);
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Reads the config file at `path`. A missing file gives defaults; an
    /// unreadable or malformed one gives defaults plus a diagnostic.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file found, using defaults");
            return Self::default();
        }
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str::<Config>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(config) => {
                info!("Loaded config from: {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                Self {
                    diagnostic: Some(format!(
                        "⚠️  Config file {} could not be used ({}); using defaults",
                        path.display(),
                        e
                    )),
                    ..Self::default()
                }
            }
        }
    }

    /// Environment variables override the config file
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let api_key = lookup("AEGIS_API_KEY")
            .or_else(|| lookup("OPENROUTER_API_KEY"))
            .filter(|key| !key.trim().is_empty());
        if let Some(api_key) = api_key {
            self.assistant_api_key = Some(api_key);
        }

        if let Some(value) = lookup("AEGIS_USE_MOCK") {
            self.use_mock = !matches!(value.trim().to_lowercase().as_str(), "0" | "false" | "no");
        }
    }

    /// `$AEGIS_HOME`, or `~/.aegis`.
    pub fn aegis_home() -> Result<PathBuf> {
        if let Some(home) = env::var_os("AEGIS_HOME") {
            return Ok(PathBuf::from(home));
        }
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".aegis"))
    }

    /// `$AEGIS_CONFIG`, or `config.json` in the aegis home.
    pub fn get_config_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("AEGIS_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::aegis_home()?.join("config.json"))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    /// Set API key and save config
    pub fn set_api_key(&mut self, api_key: String) -> Result<()> {
        self.assistant_api_key = Some(api_key);
        self.save()?;
        info!("API key saved to config file");
        Ok(())
    }

    pub fn get_api_key(&self) -> Option<&str> {
        self.assistant_api_key.as_deref()
    }

    pub fn is_mock_mode(&self) -> bool {
        self.use_mock
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn show_config_info(&self, mappings_path: &Path) -> Result<()> {
        let config_path = Self::get_config_path()?;
        println!("Configuration file: {}", config_path.display());

        if config_path.exists() {
            println!("Status: Found");
        } else {
            println!("Status: Not found (using defaults)");
        }
        if let Some(diagnostic) = self.diagnostic() {
            println!("{}", diagnostic);
        }
        println!(
            "API Key: {}",
            if self.assistant_api_key.is_some() { "Set" } else { "Not set" }
        );
        println!("Assistant: {} ({})", self.assistant_model, self.assistant_url);
        println!("Mock mode: {}", self.use_mock);
        println!("Re-run after install: {}", self.rerun_after_install);

        println!("\nMapping file: {}", mappings_path.display());
        println!(
            "Status: {}",
            if mappings_path.exists() { "Found" } else { "Not found (no mappings yet)" }
        );

        println!("\nTo set API key:");
        println!("  aegis --set-api-key <your-key>");
        println!("\nOr set environment variable:");
        println!("  export AEGIS_API_KEY=<your-key>");

        Ok(())
    }
}
