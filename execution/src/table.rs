//! Probability tables keyed by setting level.
//!
//! A table is an ordered list of `(outcome, probability)` pairs. The order is part of the
//! contract: `draw` walks it cumulatively, so a fixed sample always maps to the same outcome.
//! Mass not assigned to any entry is the implicit miss.

use serde::Deserialize;
use slotfloor_types::slot::{BASE_SETTING_LEVEL, MAX_SETTING_LEVEL, MIN_SETTING_LEVEL};
use slotfloor_types::Outcome;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read probability table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse probability table: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("setting level {0} is outside 1..=6")]
    LevelOutOfRange(u8),
    #[error("setting level 1 must be populated")]
    MissingBaseLevel,
    #[error("level {level}: {outcome} probability {value} is outside (0, 1)")]
    Probability { level: u8, outcome: Outcome, value: f64 },
    #[error("level {level}: {outcome} is listed more than once")]
    Duplicate { level: u8, outcome: Outcome },
    #[error("level {level}: the miss outcome cannot be listed")]
    ExplicitMiss { level: u8 },
    #[error("level {level}: probabilities sum to {sum}, above 1")]
    Sum { level: u8, sum: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct ProbabilityEntry {
    pub outcome: Outcome,
    pub probability: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityTable {
    entries: Vec<ProbabilityEntry>,
}

impl ProbabilityTable {
    fn validated(level: u8, entries: Vec<ProbabilityEntry>) -> Result<Self, TableError> {
        let mut sum = 0.0;
        for (index, entry) in entries.iter().enumerate() {
            if entry.outcome == Outcome::Miss {
                return Err(TableError::ExplicitMiss { level });
            }
            if !(entry.probability > 0.0 && entry.probability < 1.0) {
                return Err(TableError::Probability {
                    level,
                    outcome: entry.outcome,
                    value: entry.probability,
                });
            }
            if entries[..index].iter().any(|e| e.outcome == entry.outcome) {
                return Err(TableError::Duplicate {
                    level,
                    outcome: entry.outcome,
                });
            }
            sum += entry.probability;
        }
        if sum > 1.0 {
            return Err(TableError::Sum { level, sum });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ProbabilityEntry] {
        &self.entries
    }

    pub fn total_probability(&self) -> f64 {
        self.entries.iter().map(|entry| entry.probability).sum()
    }

    /// Level 1 of the reference machine.
    pub fn reference() -> Self {
        let entries = [
            (Outcome::Big, 0.00257),
            (Outcome::Reg, 0.00157),
            (Outcome::CherryBig, 0.00108),
            (Outcome::CherryReg, 0.00070),
            (Outcome::Grape, 0.166),
            (Outcome::Clown, 0.000915),
            (Outcome::Bell, 0.000915),
            (Outcome::Replay, 0.137),
            (Outcome::Cherry, 0.0281),
        ]
        .into_iter()
        .map(|(outcome, probability)| ProbabilityEntry {
            outcome,
            probability,
        })
        .collect();
        Self { entries }
    }
}

#[derive(Deserialize)]
struct TableFile {
    levels: BTreeMap<u8, Vec<ProbabilityEntry>>,
}

/// Tables for every setting level. Levels without their own table use the base level.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityTables {
    base: ProbabilityTable,
    overrides: BTreeMap<u8, ProbabilityTable>,
}

impl Default for ProbabilityTables {
    fn default() -> Self {
        Self::reference()
    }
}

impl ProbabilityTables {
    pub fn reference() -> Self {
        Self {
            base: ProbabilityTable::reference(),
            overrides: BTreeMap::new(),
        }
    }

    /// Parse a YAML document of the form:
    ///
    /// ```yaml
    /// levels:
    ///   1:
    ///     - { outcome: BIG, probability: 0.00257 }
    ///     - { outcome: GRAPE, probability: 0.166 }
    /// ```
    pub fn from_yaml(source: &str) -> Result<Self, TableError> {
        let file: TableFile = serde_yaml::from_str(source)?;
        let mut base = None;
        let mut overrides = BTreeMap::new();
        for (level, entries) in file.levels {
            if !(MIN_SETTING_LEVEL..=MAX_SETTING_LEVEL).contains(&level) {
                return Err(TableError::LevelOutOfRange(level));
            }
            let table = ProbabilityTable::validated(level, entries)?;
            if level == BASE_SETTING_LEVEL {
                base = Some(table);
            } else {
                overrides.insert(level, table);
            }
        }
        Ok(Self {
            base: base.ok_or(TableError::MissingBaseLevel)?,
            overrides,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn for_level(&self, level: u8) -> &ProbabilityTable {
        self.overrides.get(&level).unwrap_or(&self.base)
    }

    pub fn populated_levels(&self) -> Vec<u8> {
        std::iter::once(BASE_SETTING_LEVEL)
            .chain(self.overrides.keys().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_levels_fall_back_to_base() {
        let tables = ProbabilityTables::reference();
        for level in MIN_SETTING_LEVEL..=MAX_SETTING_LEVEL {
            assert_eq!(tables.for_level(level), &ProbabilityTable::reference());
        }
        assert_eq!(tables.for_level(0), tables.for_level(1));
        assert_eq!(tables.populated_levels(), vec![1]);
    }

    #[test]
    fn reference_table_order_is_fixed() {
        let table = ProbabilityTable::reference();
        let order: Vec<Outcome> = table.entries().iter().map(|e| e.outcome).collect();
        assert_eq!(
            order,
            vec![
                Outcome::Big,
                Outcome::Reg,
                Outcome::CherryBig,
                Outcome::CherryReg,
                Outcome::Grape,
                Outcome::Clown,
                Outcome::Bell,
                Outcome::Replay,
                Outcome::Cherry,
            ]
        );
        assert!(table.total_probability() < 1.0);
    }

    #[test]
    fn yaml_tables_keep_listed_order() {
        let tables = ProbabilityTables::from_yaml(concat!(
            "levels:\n",
            "  1:\n",
            "    - { outcome: GRAPE, probability: 0.5 }\n",
            "    - { outcome: BIG, probability: 0.1 }\n",
            "  3:\n",
            "    - { outcome: BELL, probability: 0.2 }\n",
        ))
        .unwrap();
        let base: Vec<Outcome> = tables
            .for_level(1)
            .entries()
            .iter()
            .map(|e| e.outcome)
            .collect();
        assert_eq!(base, vec![Outcome::Grape, Outcome::Big]);
        assert_eq!(tables.for_level(3).entries()[0].outcome, Outcome::Bell);
        assert_eq!(tables.for_level(2), tables.for_level(1));
    }

    #[test]
    fn yaml_requires_base_level() {
        let err = ProbabilityTables::from_yaml(
            "levels:\n  2:\n    - { outcome: GRAPE, probability: 0.5 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, TableError::MissingBaseLevel));
    }

    #[test]
    fn yaml_rejects_bad_tables() {
        let cases = [
            "levels:\n  7:\n    - { outcome: GRAPE, probability: 0.5 }\n",
            "levels:\n  1:\n    - { outcome: GRAPE, probability: 1.5 }\n",
            concat!(
                "levels:\n  1:\n",
                "    - { outcome: GRAPE, probability: 0.6 }\n",
                "    - { outcome: BELL, probability: 0.6 }\n",
            ),
            concat!(
                "levels:\n  1:\n",
                "    - { outcome: GRAPE, probability: 0.1 }\n",
                "    - { outcome: GRAPE, probability: 0.1 }\n",
            ),
            "levels:\n  1:\n    - { outcome: MISS, probability: 0.1 }\n",
            "levels:\n  1:\n    - { outcome: JACKPOT, probability: 0.1 }\n",
        ];
        for case in cases {
            assert!(ProbabilityTables::from_yaml(case).is_err(), "accepted: {case}");
        }
    }
}
