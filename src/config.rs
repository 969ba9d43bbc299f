use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub accept_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accept_timeout_secs: 60,
            idle_timeout_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

impl Settings {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Raw JSON representation — all fields optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "attach.acceptTimeoutSecs")]
    accept_timeout_secs: Option<u64>,
    #[serde(rename = "attach.idleTimeoutSecs")]
    idle_timeout_secs: Option<u64>,
    #[serde(rename = "poll.intervalMs")]
    poll_interval_ms: Option<u64>,
}

/// Runtime directory (`~/.periscope`, temp dir as fallback).
pub fn runtime_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".periscope")
}

/// Resolve settings: defaults overridden by `~/.periscope/settings.json`.
pub fn resolve() -> Settings {
    let path = runtime_dir().join("settings.json");
    resolve_with_path(Some(&path))
}

/// Testable resolver that accepts an explicit file path (no home dir dependency).
fn resolve_with_path(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();
    if let Some(path) = path {
        apply_file(&mut settings, path);
    }
    settings
}

fn apply_file(settings: &mut Settings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };
    if let Some(v) = file.accept_timeout_secs {
        if (1..=600).contains(&v) {
            settings.accept_timeout_secs = v;
        } else {
            tracing::warn!(
                "attach.acceptTimeoutSecs ({}) out of range (1..600), using default",
                v
            );
        }
    }
    if let Some(v) = file.idle_timeout_secs {
        if (1..=3600).contains(&v) {
            settings.idle_timeout_secs = v;
        } else {
            tracing::warn!(
                "attach.idleTimeoutSecs ({}) out of range (1..3600), using default",
                v
            );
        }
    }
    if let Some(v) = file.poll_interval_ms {
        if (100..=60_000).contains(&v) {
            settings.poll_interval_ms = v;
        } else {
            tracing::warn!(
                "poll.intervalMs ({}) out of range (100..60000), using default",
                v
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_no_file_exists() {
        let settings = resolve_with_path(None);
        assert_eq!(settings.accept_timeout_secs, 60);
        assert_eq!(settings.idle_timeout_secs, 60);
        assert_eq!(settings.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"poll.intervalMs": 250}"#).unwrap();

        let settings = resolve_with_path(Some(&path));
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.idle_timeout_secs, 60); // unchanged
    }

    #[test]
    fn test_invalid_json_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json {{{").unwrap();

        let settings = resolve_with_path(Some(&path));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_file_ignored() {
        let settings = resolve_with_path(Some(Path::new("/nonexistent/settings.json")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_out_of_range_uses_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"attach.acceptTimeoutSecs": 0, "poll.intervalMs": 5}"#).unwrap();

        let settings = resolve_with_path(Some(&path));
        assert_eq!(settings.accept_timeout_secs, 60);
        assert_eq!(settings.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"attach.idleTimeoutSecs": 30, "unknown.key": true}"#).unwrap();

        let settings = resolve_with_path(Some(&path));
        assert_eq!(settings.idle_timeout_secs, 30);
    }
}
