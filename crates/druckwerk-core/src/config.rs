// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service settings, loaded from a YAML file at startup.
//
// The printer and scanner lists form the device registry; it is immutable
// for the lifetime of the process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DruckwerkError, Result};
use crate::types::{Printer, Scanner};

/// Identity-provider (accounts service) integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsSettings {
    /// Base URL of the accounts API.
    pub api_url: String,
    /// Service JWT for calling the accounts API.
    pub api_jwt_token: String,
}

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Prefix under which the HTTP API is mounted (e.g. "/api/v0").
    #[serde(default)]
    pub app_root_path: String,
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path of the SQLite database holding chat-state rows.
    pub database_path: PathBuf,
    /// Allowed CORS origins as a regex (e.g. `https://.*\.example\.org`).
    #[serde(default = "default_cors_regex")]
    pub cors_allow_origin_regex: String,
    pub accounts: AccountsSettings,
    /// Shared secret of the chat bot; also the trailing component of
    /// bot-composite bearer tokens.
    pub bot_token: String,
    /// Endpoint of the document-to-PDF conversion service.
    pub converter_url: String,
    /// Directory that holds all transient artifacts.
    pub temp_dir: PathBuf,
    #[serde(default)]
    pub printers: Vec<Printer>,
    #[serde(default)]
    pub scanners: Vec<Scanner>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_regex() -> String {
    ".*".to_string()
}

impl Settings {
    /// Load and validate settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|e| {
            DruckwerkError::InvalidArgument(format!(
                "settings file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        settings.validate()?;
        info!(
            printers = settings.printers.len(),
            scanners = settings.scanners.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.is_empty() {
            return Err(DruckwerkError::InvalidArgument(
                "bot_token must not be empty".into(),
            ));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(DruckwerkError::InvalidArgument(
                "temp_dir must not be empty".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for printer in &self.printers {
            if !seen.insert(&printer.cups_name) {
                return Err(DruckwerkError::InvalidArgument(format!(
                    "duplicate printer cups_name '{}'",
                    printer.cups_name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for scanner in &self.scanners {
            if !seen.insert(&scanner.name) {
                return Err(DruckwerkError::InvalidArgument(format!(
                    "duplicate scanner name '{}'",
                    scanner.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a printer by its CUPS queue name.
    pub fn find_printer(&self, cups_name: &str) -> Option<&Printer> {
        self.printers.iter().find(|p| p.cups_name == cups_name)
    }

    /// Look up a scanner by its stable name.
    pub fn find_scanner(&self, name: &str) -> Option<&Scanner> {
        self.scanners.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
app_root_path: "/api/v0"
bind_addr: "127.0.0.1:8000"
database_path: "/var/lib/druckwerk/state.db"
cors_allow_origin_regex: "https://.*\\.example\\.org"
accounts:
  api_url: "https://accounts.example.org/v0"
  api_jwt_token: "service-token"
bot_token: "123456:bot-secret"
converter_url: "http://converter:2003"
temp_dir: "/tmp/druckwerk"
printers:
  - display_name: "Office printer"
    cups_name: "office"
    ipp: "http://10.0.0.10:631/ipp/print"
scanners:
  - display_name: "Office scanner"
    name: "office-scan"
    escl: "https://10.0.0.11/eSCL"
"#;

    #[test]
    fn parses_sample_settings() {
        let settings: Settings = serde_yaml::from_str(SAMPLE).expect("parse");
        settings.validate().expect("validate");
        assert_eq!(settings.printers.len(), 1);
        assert_eq!(settings.find_printer("office").unwrap().display_name, "Office printer");
        assert!(settings.find_printer("nope").is_none());
        assert_eq!(settings.find_scanner("office-scan").unwrap().escl, "https://10.0.0.11/eSCL");
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, SAMPLE).expect("write");
        let settings = Settings::load(&path).expect("load");
        assert_eq!(settings.bind_addr, "127.0.0.1:8000");
    }

    #[test]
    fn empty_bot_token_is_rejected() {
        let mut settings: Settings = serde_yaml::from_str(SAMPLE).expect("parse");
        settings.bot_token.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicate_cups_names_are_rejected() {
        let mut settings: Settings = serde_yaml::from_str(SAMPLE).expect("parse");
        settings.printers.push(settings.printers[0].clone());
        assert!(settings.validate().is_err());
    }
}
