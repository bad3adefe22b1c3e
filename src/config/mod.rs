//! Configuration and session storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::SessionStore;
use crate::backend::appwrite::AppwriteSettings;
use crate::backend::Session;
use crate::gif::KLIPY_BASE;

/// Colour scheme preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        })
    }
}

/// How GIF searches reach the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GifMode {
    /// Through the relay, which holds the provider key
    #[default]
    Relay,
    /// Straight to Klipy with a locally stored key
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GifSettings {
    pub mode: GifMode,
    /// Relay endpoint (e.g. `http://127.0.0.1:8787/`)
    pub relay_url: Option<String>,
    /// Provider key, only used in direct mode
    pub klipy_api_key: Option<String>,
    pub klipy_base: String,
}

impl Default for GifSettings {
    fn default() -> Self {
        Self {
            mode: GifMode::Relay,
            relay_url: None,
            klipy_api_key: None,
            klipy_base: KLIPY_BASE.to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UI theme, persisted across runs
    pub theme: Theme,
    /// Backend project and collection ids
    pub appwrite: AppwriteSettings,
    /// GIF search routing
    pub gif: GifSettings,
    /// Signed-in session (contains the session secret)
    pub session: Option<Session>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "vibe-cli", "vibe-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the session secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }
}

impl SessionStore for Config {
    fn get_session(&self) -> Option<Session> {
        self.session.clone()
    }

    fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    fn clear_session(&mut self) {
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("vibe-cli-test-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(&temp_path()).unwrap();
        assert_eq!(config.theme, Theme::Dark);
        assert_eq!(config.gif.mode, GifMode::Relay);
        assert_eq!(config.gif.klipy_base, KLIPY_BASE);
        assert!(config.session.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let mut config = Config {
            theme: Theme::Light,
            ..Default::default()
        };
        config.appwrite.project = "vibe".into();
        config.gif.relay_url = Some("http://127.0.0.1:8787/".into());
        config.set_session(Session {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            secret: "{\"a_session_vibe\":\"xyz\"}".into(),
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
        });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.theme, Theme::Light);
        assert_eq!(loaded.appwrite.project, "vibe");
        assert_eq!(loaded.gif, config.gif);
        assert_eq!(loaded.get_session(), config.session);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("theme = \"light\"\n[gif]\nmode = \"direct\"\n").unwrap();
        assert_eq!(config.theme, Theme::Light);
        assert_eq!(config.gif.mode, GifMode::Direct);
        assert_eq!(config.gif.klipy_base, KLIPY_BASE);
    }

    #[test]
    fn test_theme_toggle() {
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
        assert_eq!(Theme::Light.toggled().to_string(), "dark");
    }
}
