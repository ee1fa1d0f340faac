//! Rewrites raw categorical cells into their canonical typed forms.

use std::collections::BTreeMap;

use super::model::{Condition, InfectionStatus, SnailSpecies, Temperature};

/// Any raw value containing `marker` (case as in source) is a control;
/// everything else is experimental.
pub fn normalize_condition(raw: &str, marker: &str) -> Condition {
    if raw.contains(marker) {
        Condition::Control
    } else {
        Condition::Experimental
    }
}

/// Maps raw species codes onto the two canonical labels.
#[derive(Debug, Clone)]
pub struct SpeciesMap {
    codes: BTreeMap<String, String>,
}

impl SpeciesMap {
    pub fn new(codes: &BTreeMap<String, String>) -> Self {
        Self {
            codes: codes.clone(),
        }
    }

    /// Exact code match first, then case-insensitive. A cell that already
    /// holds a canonical label is accepted as-is.
    pub fn normalize(&self, raw: &str) -> Option<SnailSpecies> {
        let raw = raw.trim();
        if let Some(label) = self.codes.get(raw) {
            return Some(SnailSpecies(label.clone()));
        }
        self.codes
            .iter()
            .find(|(code, label)| code.eq_ignore_ascii_case(raw) || label.eq_ignore_ascii_case(raw))
            .map(|(_, label)| SnailSpecies(label.clone()))
    }
}

/// `None` means the value is not a recognised status.
pub fn parse_infection_status(raw: &str) -> Option<InfectionStatus> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(InfectionStatus::NotApplicable);
    }
    match raw.to_ascii_lowercase().as_str() {
        "infected" | "i" | "inf" => Some(InfectionStatus::Infected),
        "uninfected" | "u" | "uninf" => Some(InfectionStatus::Uninfected),
        "na" | "n/a" | "not_applicable" | "none" => Some(InfectionStatus::NotApplicable),
        _ => None,
    }
}

/// Accepts `21`, `21.5`, `21C`, `21 °C`.
pub fn parse_temperature(raw: &str) -> Option<Temperature> {
    let trimmed = raw
        .trim()
        .trim_end_matches(['C', 'c'])
        .trim_end()
        .trim_end_matches('°')
        .trim_end();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .map(Temperature)
}

/// Y/N quality flags; only a "Y" sets the flag.
pub fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|s| s.trim().eq_ignore_ascii_case("y"))
        .unwrap_or(false)
}

/// Berried status; `None` for empty or unrecognised cells.
pub fn parse_berried(raw: Option<&str>) -> Option<bool> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn species() -> SpeciesMap {
        let mut codes = BTreeMap::new();
        codes.insert("P".to_string(), "Physa acuta".to_string());
        codes.insert("H".to_string(), "Helisoma trivolvis".to_string());
        SpeciesMap::new(&codes)
    }

    #[test]
    fn condition_is_substring_match() {
        assert_eq!(normalize_condition("control", "control"), Condition::Control);
        assert_eq!(normalize_condition("snail_control", "control"), Condition::Control);
        assert_eq!(normalize_condition("crayfish", "control"), Condition::Experimental);
        // case as in source
        assert_eq!(normalize_condition("Control", "control"), Condition::Experimental);
    }

    #[test]
    fn species_codes_map_to_labels() {
        let map = species();
        assert_eq!(map.normalize("P"), Some(SnailSpecies("Physa acuta".into())));
        assert_eq!(map.normalize(" h "), Some(SnailSpecies("Helisoma trivolvis".into())));
        assert_eq!(map.normalize("physa acuta"), Some(SnailSpecies("Physa acuta".into())));
        assert_eq!(map.normalize("L"), None);
    }

    #[test]
    fn infection_status_variants() {
        assert_eq!(parse_infection_status("Infected"), Some(InfectionStatus::Infected));
        assert_eq!(parse_infection_status("uninfected"), Some(InfectionStatus::Uninfected));
        assert_eq!(parse_infection_status("NA"), Some(InfectionStatus::NotApplicable));
        assert_eq!(parse_infection_status(""), Some(InfectionStatus::NotApplicable));
        assert_eq!(parse_infection_status("maybe"), None);
    }

    #[test]
    fn temperatures_with_units() {
        assert_eq!(parse_temperature("21"), Some(Temperature(21.0)));
        assert_eq!(parse_temperature("22.5C"), Some(Temperature(22.5)));
        assert_eq!(parse_temperature("18 °C"), Some(Temperature(18.0)));
        assert_eq!(parse_temperature("warm"), None);
        assert_eq!(parse_temperature("NaN"), None);
    }

    #[test]
    fn flags_and_berried() {
        assert!(parse_flag(Some("Y")));
        assert!(!parse_flag(Some("N")));
        assert!(!parse_flag(None));
        assert_eq!(parse_berried(Some("yes")), Some(true));
        assert_eq!(parse_berried(Some("N")), Some(false));
        assert_eq!(parse_berried(Some("?")), None);
        assert_eq!(parse_berried(None), None);
    }
}
