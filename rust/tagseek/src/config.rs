use crate::errors::ConfigError;
use crate::models::mass::{
    Mass,
    mass_from_daltons,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;

/// Longest tag the generator and the trie accept.
pub const MAX_TAG_LENGTH: usize = 6;

/// The windowed aligner tracks at most this many modifications per peptide.
pub const MAX_ALIGNMENT_MODS: usize = 2;

/// Longest database window the aligner considers.
pub const MAX_ALIGNMENT_ROWS: usize = 256;

/// Longest flank a tag hit is extended by on either side.
pub const MAX_FLANK_RESIDUES: usize = 128;

/// Upper bound on the per-peptide modification budget in any mode.
pub const MAX_MOD_BUDGET: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SearchMode {
    /// Tag trie scan followed by flank extension.
    #[default]
    #[serde(rename = "tag")]
    Tag,
    /// Windowed DP alignment with the catalogued modifications.
    #[serde(rename = "alignment")]
    Alignment,
    /// Windowed DP alignment with every offset of the blind window.
    #[serde(rename = "blind")]
    Blind,
}

impl SearchMode {
    pub fn uses_alignment(&self) -> bool {
        matches!(self, SearchMode::Alignment | SearchMode::Blind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Protease {
    #[default]
    #[serde(rename = "trypsin")]
    Trypsin,
    #[serde(rename = "none")]
    None,
}

impl Protease {
    /// Whether a peptide may start right after `previous` (`None` at a record start).
    pub fn consistent_start(&self, previous: Option<u8>, first: u8) -> bool {
        match self {
            Protease::None => true,
            Protease::Trypsin => match previous {
                None => true,
                Some(prev) => matches!(prev, b'K' | b'R') && first != b'P',
            },
        }
    }

    /// Whether a peptide may end on `last` when followed by `next` (`None` at a record end).
    pub fn consistent_end(&self, last: u8, next: Option<u8>) -> bool {
        match self {
            Protease::None => true,
            Protease::Trypsin => match next {
                None => true,
                Some(next) => matches!(last, b'K' | b'R') && next != b'P',
            },
        }
    }
}

/// Where a modification may attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Terminal {
    #[default]
    #[serde(rename = "any")]
    Anywhere,
    #[serde(rename = "n-term")]
    NTerm,
    #[serde(rename = "c-term")]
    CTerm,
}

/// A variable modification declared in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationSpec {
    pub name: String,
    pub mass_da: f64,
    /// Residue letters the modification applies to, `*` for any residue.
    pub residues: String,
    #[serde(default)]
    pub terminal: Terminal,
    #[serde(default = "default_modification_score")]
    pub score: f32,
}

fn default_modification_score() -> f32 {
    -1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedModificationSpec {
    pub residue: char,
    pub mass_da: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub mode: SearchMode,
    pub fragment_tolerance_da: f64,
    pub parent_tolerance_da: f64,
    pub mod_budget: usize,
    pub max_mods_per_type: usize,
    pub tag_length: usize,
    pub max_tags: usize,
    pub max_matches: usize,
    pub blind_window_da: (f64, f64),
    pub mandatory_modification: Option<String>,
    pub min_modification_score: Option<f32>,
    pub protease: Protease,
    pub protease_penalty: f32,
    pub slide_score_tolerance: f32,
    pub max_alignment_rows: usize,
    pub scan_window_bytes: usize,
    pub scan_pad_bytes: usize,
    pub block_size: usize,
    pub modifications: Vec<ModificationSpec>,
    pub fixed_modifications: Vec<FixedModificationSpec>,
    /// Binary modification catalog merged with `modifications`.
    pub modification_file: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Tag,
            fragment_tolerance_da: 0.5,
            parent_tolerance_da: 1.0,
            mod_budget: 2,
            max_mods_per_type: 2,
            tag_length: 3,
            max_tags: 50,
            max_matches: 10,
            blind_window_da: (-130.0, 250.0),
            mandatory_modification: None,
            min_modification_score: None,
            protease: Protease::Trypsin,
            protease_penalty: -1.0,
            slide_score_tolerance: 1.0,
            max_alignment_rows: 40,
            scan_window_bytes: 1 << 20,
            scan_pad_bytes: 512,
            block_size: 64,
            modifications: Vec::new(),
            fixed_modifications: vec![FixedModificationSpec {
                residue: 'C',
                mass_da: 57.021464,
            }],
            modification_file: None,
        }
    }
}

impl SearchConfig {
    pub fn fragment_tolerance(&self) -> Mass {
        mass_from_daltons(self.fragment_tolerance_da)
    }

    pub fn parent_tolerance(&self) -> Mass {
        mass_from_daltons(self.parent_tolerance_da)
    }

    pub fn blind_window(&self) -> (Mass, Mass) {
        (
            mass_from_daltons(self.blind_window_da.0),
            mass_from_daltons(self.blind_window_da.1),
        )
    }

    /// Checks every field once, before any search work is done.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fragment_tolerance_da.is_finite() && self.fragment_tolerance_da > 0.0) {
            return Err(ConfigError::InvalidTolerance {
                field: "fragment_tolerance_da",
                value: self.fragment_tolerance_da,
            });
        }
        if !(self.parent_tolerance_da.is_finite() && self.parent_tolerance_da > 0.0) {
            return Err(ConfigError::InvalidTolerance {
                field: "parent_tolerance_da",
                value: self.parent_tolerance_da,
            });
        }
        if self.tag_length == 0 || self.tag_length > MAX_TAG_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "tag_length",
                context: format!("{} is not in 1..={}", self.tag_length, MAX_TAG_LENGTH),
            });
        }
        if self.max_tags == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tags",
                context: "must be at least 1".to_string(),
            });
        }
        if self.max_matches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_matches",
                context: "must be at least 1".to_string(),
            });
        }
        if self.mod_budget > MAX_MOD_BUDGET {
            return Err(ConfigError::InvalidValue {
                field: "mod_budget",
                context: format!("{} exceeds the maximum of {}", self.mod_budget, MAX_MOD_BUDGET),
            });
        }
        if self.mode.uses_alignment() && self.mod_budget > MAX_ALIGNMENT_MODS {
            return Err(ConfigError::InvalidValue {
                field: "mod_budget",
                context: format!(
                    "alignment modes support at most {} modifications, got {}",
                    MAX_ALIGNMENT_MODS, self.mod_budget
                ),
            });
        }
        let (low, high) = self.blind_window_da;
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(ConfigError::InvalidValue {
                field: "blind_window_da",
                context: format!("({}, {}) is not an increasing range", low, high),
            });
        }
        if self.max_alignment_rows == 0 || self.max_alignment_rows > MAX_ALIGNMENT_ROWS {
            return Err(ConfigError::InvalidValue {
                field: "max_alignment_rows",
                context: format!(
                    "{} is not in 1..={}",
                    self.max_alignment_rows, MAX_ALIGNMENT_ROWS
                ),
            });
        }
        // Both the alignment window and a tag flank look back from the cursor.
        let lookback = self.max_alignment_rows.max(MAX_FLANK_RESIDUES) + MAX_TAG_LENGTH;
        if self.scan_pad_bytes < lookback {
            return Err(ConfigError::InvalidValue {
                field: "scan_pad_bytes",
                context: format!(
                    "{} is smaller than the {} bytes a flank or alignment window can look back",
                    self.scan_pad_bytes, lookback
                ),
            });
        }
        if self.scan_pad_bytes * 2 >= self.scan_window_bytes {
            return Err(ConfigError::InvalidValue {
                field: "scan_pad_bytes",
                context: format!(
                    "pad {} must be less than half the window {}",
                    self.scan_pad_bytes, self.scan_window_bytes
                ),
            });
        }
        if self.block_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "block_size",
                context: "must be at least 1".to_string(),
            });
        }
        if !self.slide_score_tolerance.is_finite() || self.slide_score_tolerance < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "slide_score_tolerance",
                context: format!("{} must be a non-negative number", self.slide_score_tolerance),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SearchConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = SearchConfig {
            fragment_tolerance_da: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTolerance { .. })
        ));

        let config = SearchConfig {
            tag_length: MAX_TAG_LENGTH + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SearchConfig {
            mode: SearchMode::Blind,
            mod_budget: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SearchConfig {
            scan_window_bytes: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pad_covers_the_longest_flank() {
        let config = SearchConfig {
            max_alignment_rows: 20,
            scan_pad_bytes: MAX_FLANK_RESIDUES + MAX_TAG_LENGTH - 1,
            scan_window_bytes: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "scan_pad_bytes",
                ..
            })
        ));

        let config = SearchConfig {
            scan_pad_bytes: MAX_FLANK_RESIDUES + MAX_TAG_LENGTH,
            ..config
        };
        assert_eq!(config.validate(), Ok(()));

        let config = SearchConfig {
            max_alignment_rows: MAX_ALIGNMENT_ROWS,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"mode": "blind", "tag_length": 4}"#).unwrap();
        assert_eq!(config.mode, SearchMode::Blind);
        assert_eq!(config.tag_length, 4);
        assert_eq!(config.max_tags, SearchConfig::default().max_tags);
    }

    #[test]
    fn test_modifications_from_json() {
        let config: SearchConfig = serde_json::from_str(
            r#"{
                "modifications": [
                    {"name": "Phospho", "mass_da": 79.966, "residues": "STY"},
                    {"name": "Acetyl", "mass_da": 42.011, "residues": "*", "terminal": "n-term", "score": -0.5}
                ],
                "fixed_modifications": []
            }"#,
        )
        .unwrap();
        assert_eq!(config.modifications.len(), 2);
        assert_eq!(config.modifications[0].terminal, Terminal::Anywhere);
        assert_eq!(config.modifications[0].score, -1.0);
        assert_eq!(config.modifications[1].terminal, Terminal::NTerm);
        assert!(config.fixed_modifications.is_empty());
        assert!(config.modification_file.is_none());
    }

    #[test]
    fn test_trypsin_rules() {
        let trypsin = Protease::Trypsin;
        assert!(trypsin.consistent_start(None, b'A'));
        assert!(trypsin.consistent_start(Some(b'K'), b'A'));
        assert!(!trypsin.consistent_start(Some(b'K'), b'P'));
        assert!(!trypsin.consistent_start(Some(b'A'), b'S'));
        assert!(trypsin.consistent_end(b'R', Some(b'A')));
        assert!(trypsin.consistent_end(b'A', None));
        assert!(!trypsin.consistent_end(b'A', Some(b'G')));
        assert!(Protease::None.consistent_end(b'A', Some(b'G')));
    }
}
