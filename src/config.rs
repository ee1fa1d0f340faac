use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Pipeline configuration, read from TOML. Every field has a default, so an
/// empty file yields the canonical setup for the published dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub crayfish_file: String,
    pub trials_file: String,
    /// Week identifier of the pilot run, excluded from every output.
    pub pilot_week: String,
    /// Substring of the raw `condition` value that marks a control trial.
    pub control_marker: String,
    /// Raw species code → canonical label. Exactly two entries.
    pub species: BTreeMap<String, String>,
    /// Individual rows removed by hand after curation.
    pub exclusions: Vec<ExclusionOverride>,
    pub expected: ExpectedCounts,
    pub theme: ThemeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let species = [("P", "Physa acuta"), ("H", "Helisoma trivolvis")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            crayfish_file: "all_trials_crayfish_digital.csv".to_string(),
            trials_file: "all_trials_snail_digital.csv".to_string(),
            pilot_week: "pilot".to_string(),
            control_marker: "control".to_string(),
            species,
            exclusions: Vec::new(),
            expected: ExpectedCounts::default(),
            theme: ThemeConfig::default(),
        }
    }
}

/// A single trial observation dropped by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionOverride {
    pub week: String,
    pub crayfish_id: String,
    pub time: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Row counts the canonical dataset is known to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedCounts {
    pub raw_total: usize,
    pub raw_experimental: usize,
    pub raw_control: usize,
    pub filtered_experimental: usize,
    pub filtered_control: usize,
}

impl Default for ExpectedCounts {
    fn default() -> Self {
        Self {
            raw_total: 960,
            raw_experimental: 600,
            raw_control: 360,
            filtered_experimental: 540,
            filtered_control: 350,
        }
    }
}

/// Inputs for the report theme handed to the plotting stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Seed for any jitter/resampling the plotting stage does.
    pub seed: u64,
    pub saturation: f32,
    pub lightness: f32,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            saturation: 0.75,
            lightness: 0.55,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.species.len() != 2 {
            return Err(PipelineError::Config(format!(
                "species table must map exactly two codes, found {}",
                self.species.len()
            )));
        }
        let labels: BTreeSet<&str> = self.species.values().map(String::as_str).collect();
        if labels.len() != 2 {
            return Err(PipelineError::Config(
                "species labels must be distinct".to_string(),
            ));
        }
        if self.control_marker.is_empty() {
            return Err(PipelineError::Config(
                "control_marker must not be empty".to_string(),
            ));
        }
        let t = &self.theme;
        if !(0.0..=1.0).contains(&t.saturation) || !(0.0..=1.0).contains(&t.lightness) {
            return Err(PipelineError::Config(
                "theme saturation and lightness must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.expected.raw_total, 960);
    }

    #[test]
    fn overrides_and_exclusions_parse() {
        let config = PipelineConfig::from_toml(
            r#"
            pilot_week = "0"

            [species]
            A = "Physella"
            B = "Lymnaea"

            [[exclusions]]
            week = "3"
            crayfish_id = "CF07"
            time = 48
            reason = "notes say snails escaped"
            "#,
        )
        .unwrap();
        assert_eq!(config.pilot_week, "0");
        assert_eq!(config.species["A"], "Physella");
        assert_eq!(config.exclusions.len(), 1);
        assert_eq!(config.exclusions[0].time, 48);
        assert_eq!(config.control_marker, "control");
    }

    #[test]
    fn species_table_must_have_two_distinct_labels() {
        let err = PipelineConfig::from_toml("[species]\nA = \"x\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = PipelineConfig::from_toml("[species]\nA = \"x\"\nB = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_toml("pilot = \"0\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Toml(_)));
    }
}
