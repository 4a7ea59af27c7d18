//! Persisted session settings: an opaque key/value bag written to a
//! namespaced file under the OS config directory, per spec.md §6. Not part
//! of the core library contract — this is ambient CLI plumbing, grounded in
//! `harmonium_cli`'s `dirs` + `toml` dependency pair.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const NAMESPACE: &str = "infinite-jazz";
const FILE_NAME: &str = "session.toml";

/// The persisted bag named in spec.md §6: `apiKey, baseUrl, model, prompt,
/// bars, tempo, swing`. Anything not set falls back to
/// [`Settings::default`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub prompt_template: String,
    pub bars_per_generation: u32,
    pub tempo: f64,
    pub swing_enabled: bool,
    pub swing_ratio: f64,
    pub direction: String,
    pub backend: BackendKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Soundfont,
    Midi,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "http://localhost:8080".to_string(),
            model: "gpt-4".to_string(),
            prompt_template: default_prompt_template(),
            bars_per_generation: 8,
            tempo: 120.0,
            swing_enabled: true,
            swing_ratio: 0.67,
            direction: String::new(),
            backend: BackendKind::Soundfont,
        }
    }
}

fn default_prompt_template() -> String {
    "You are a jazz quartet (BASS, DRUMS, PIANO, SAX) improvising over a \
     swung sixteenth-note tracker grid. Respond only with tracker notation: \
     one section header per instrument, numbered step lines of the form \
     `N PITCH:VELOCITY` (comma-separated for chords), `.` for rest, `^` for \
     tie."
        .to_string()
}

fn settings_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("could not locate the OS config directory")?;
    Ok(base.join(NAMESPACE).join(FILE_NAME))
}

impl Settings {
    /// Loads the persisted bag, or the default if none exists yet.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = settings_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Persists the bag, creating the namespaced directory if needed.
    ///
    /// # Errors
    /// Returns an error if the config directory can't be created or written.
    pub fn save(&self) -> Result<()> {
        let path = settings_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serialising session settings")?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_round_trip_through_toml() {
        let settings = Settings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.base_url, settings.base_url);
        assert_eq!(parsed.backend, settings.backend);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: Settings = toml::from_str("tempo = 140.0\n").unwrap();
        assert_eq!(parsed.tempo, 140.0);
        assert_eq!(parsed.bars_per_generation, Settings::default().bars_per_generation);
    }
}
