use std::collections::BTreeMap;

use palette::{Hsl, IntoColor, Srgb};
use serde::Serialize;

use crate::config::ThemeConfig;
use crate::data::model::{Condition, InfectionStatus, TrialTable};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize, saturation: f32, lightness: f32) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            hex(Hsl::new(hue, saturation, lightness))
        })
        .collect()
}

/// `n` colours from blue (coldest) to red (warmest), for ordinal levels.
pub fn ordered_ramp(n: usize, saturation: f32, lightness: f32) -> Vec<String> {
    match n {
        0 => Vec::new(),
        1 => vec![hex(Hsl::new(240.0, saturation, lightness))],
        _ => (0..n)
            .map(|i| {
                let hue = 240.0 - 240.0 * (i as f32 / (n - 1) as f32);
                hex(Hsl::new(hue, saturation, lightness))
            })
            .collect(),
    }
}

fn hex(hsl: Hsl) -> String {
    let rgb: Srgb = hsl.into_color();
    format!(
        "#{:02x}{:02x}{:02x}",
        (rgb.red.clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb.green.clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8,
    )
}

// ---------------------------------------------------------------------------
// ReportTheme: factor level → colour, plus the plotting seed
// ---------------------------------------------------------------------------

/// Colours and seed for the plotting stage, passed to it explicitly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTheme {
    pub seed: u64,
    pub species: BTreeMap<String, String>,
    pub condition: BTreeMap<String, String>,
    pub infection_status: BTreeMap<String, String>,
    /// Keyed by the temperature level as written in the tables.
    pub temp: BTreeMap<String, String>,
    /// Temperature levels in ascending order, matching `temp_level`.
    pub temp_order: Vec<String>,
}

impl ReportTheme {
    /// Assign colours to every level observed in `table`.
    pub fn for_table(table: &TrialTable, config: &ThemeConfig) -> Self {
        let (s, l) = (config.saturation, config.lightness);

        let mut species: Vec<String> = table.rows.iter().map(|r| r.trial.species.to_string()).collect();
        species.sort();
        species.dedup();

        let conditions = [Condition::Control, Condition::Experimental].map(|c| c.to_string());
        let infection = [
            InfectionStatus::Infected,
            InfectionStatus::Uninfected,
            InfectionStatus::NotApplicable,
        ]
        .map(|i| i.to_string());
        let temp_order: Vec<String> = table.temp_levels.iter().map(ToString::to_string).collect();

        ReportTheme {
            seed: config.seed,
            species: zip_palette(&species, generate_palette(species.len(), s, l)),
            condition: zip_palette(&conditions, generate_palette(conditions.len(), s, l)),
            infection_status: zip_palette(&infection, generate_palette(infection.len(), s, l)),
            temp: zip_palette(&temp_order, ordered_ramp(temp_order.len(), s, l)),
            temp_order,
        }
    }
}

fn zip_palette(levels: &[String], palette: Vec<String>) -> BTreeMap<String, String> {
    levels.iter().cloned().zip(palette).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::trial;

    #[test]
    fn palette_has_distinct_hex_colours() {
        let colours = generate_palette(4, 0.75, 0.55);
        assert_eq!(colours.len(), 4);
        assert!(colours.iter().all(|c| c.len() == 7 && c.starts_with('#')));
        let mut unique = colours.clone();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert!(generate_palette(0, 0.75, 0.55).is_empty());
    }

    #[test]
    fn ramp_runs_cold_to_warm() {
        let ramp = ordered_ramp(5, 1.0, 0.5);
        assert_eq!(ramp.first().map(String::as_str), Some("#0000ff"));
        assert_eq!(ramp.last().map(String::as_str), Some("#ff0000"));
    }

    #[test]
    fn theme_covers_observed_levels() {
        let table = TrialTable::from_rows(vec![
            trial("1", "c1", 12, 15.0),
            trial("1", "c2", 12, 27.0),
            trial("1", "c3", 12, 21.0),
        ]);
        let theme = ReportTheme::for_table(&table, &ThemeConfig::default());
        assert_eq!(theme.seed, 42);
        assert_eq!(theme.temp_order, vec!["15", "21", "27"]);
        assert_eq!(theme.temp.len(), 3);
        assert_eq!(theme.species.len(), 1);
        assert_eq!(theme.condition.len(), 2);
        assert_eq!(theme.infection_status.len(), 3);
    }
}
