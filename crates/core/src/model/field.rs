use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::model::category::Category;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FieldError {
    #[error("{category} has no stage {index} (stages run 1..={max})")]
    StageOutOfRange {
        category: Category,
        index: u8,
        max: u8,
    },
}

//
// ─── STAGE KEY ─────────────────────────────────────────────────────────────────
//

/// A single scored stage within a category, e.g. `RoadmapStage3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKey {
    category: Category,
    index: u8,
}

impl StageKey {
    /// Creates a stage key, validating the index against the category's
    /// stage count.
    ///
    /// # Errors
    ///
    /// Returns `FieldError::StageOutOfRange` if `index` is zero or beyond the
    /// category's last stage.
    pub fn new(category: Category, index: u8) -> Result<Self, FieldError> {
        if index == 0 || index > category.stage_count() {
            return Err(FieldError::StageOutOfRange {
                category,
                index,
                max: category.stage_count(),
            });
        }
        Ok(Self { category, index })
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Highest score this stage can hold.
    #[must_use]
    pub fn max_score(&self) -> u32 {
        self.category.max_stage_score()
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.category.wire_prefix(), self.index)
    }
}

//
// ─── FIELD KEY ─────────────────────────────────────────────────────────────────
//

/// Canonical wire name for every persisted progress field.
///
/// The source data keyed these inconsistently across iterations; this enum is
/// the single schema both the local cache and the remote document use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKey {
    Stage(StageKey),
    UnlockedStages,
    DailyScore,
    FreestyleScore,
    LastDailyAnswerDate,
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Stage(stage) => stage.fmt(f),
            FieldKey::UnlockedStages => f.write_str("unlockedStages"),
            FieldKey::DailyScore => f.write_str("dailyScore"),
            FieldKey::FreestyleScore => f.write_str("freestyleScore"),
            FieldKey::LastDailyAnswerDate => f.write_str("lastDailyAnswerDate"),
        }
    }
}

/// Error type for parsing a `FieldKey` from its wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFieldKeyError {
    raw: String,
}

impl fmt::Display for ParseFieldKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown progress field: {}", self.raw)
    }
}

impl std::error::Error for ParseFieldKeyError {}

impl FromStr for FieldKey {
    type Err = ParseFieldKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlockedStages" => return Ok(FieldKey::UnlockedStages),
            "dailyScore" => return Ok(FieldKey::DailyScore),
            "freestyleScore" => return Ok(FieldKey::FreestyleScore),
            "lastDailyAnswerDate" => return Ok(FieldKey::LastDailyAnswerDate),
            _ => {}
        }

        for category in Category::ALL {
            if let Some(rest) = s.strip_prefix(category.wire_prefix()) {
                let index: u8 = rest
                    .parse()
                    .map_err(|_| ParseFieldKeyError { raw: s.to_string() })?;
                let stage = StageKey::new(category, index)
                    .map_err(|_| ParseFieldKeyError { raw: s.to_string() })?;
                return Ok(FieldKey::Stage(stage));
            }
        }

        Err(ParseFieldKeyError { raw: s.to_string() })
    }
}

// Field keys appear as JSON object keys in persisted records and on the wire,
// so they serialize as their wire names.
impl Serialize for FieldKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

//
// ─── FIELD VALUE ───────────────────────────────────────────────────────────────
//

/// Value carried by a progress field: scores and levels are integers, the
/// daily-answer marker is a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(u32),
    Date(NaiveDate),
}

impl FieldValue {
    #[must_use]
    pub fn as_int(&self) -> Option<u32> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Date(_) => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Int(_) => None,
            FieldValue::Date(d) => Some(*d),
        }
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

/// Flat field map: the shape of the remote document, the cached snapshot
/// record, and a mutation's payload.
pub type FieldMap = BTreeMap<FieldKey, FieldValue>;

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_key_validates_bounds() {
        assert!(StageKey::new(Category::Roadmap, 0).is_err());
        assert!(StageKey::new(Category::Roadmap, 16).is_err());
        assert!(StageKey::new(Category::Roadmap, 15).is_ok());
        assert!(StageKey::new(Category::TimeTrial, 30).is_ok());
        assert!(StageKey::new(Category::TimeTrial, 31).is_err());
    }

    #[test]
    fn field_key_wire_names() {
        let stage = StageKey::new(Category::Roadmap, 3).unwrap();
        assert_eq!(FieldKey::Stage(stage).to_string(), "RoadmapStage3");
        assert_eq!(FieldKey::UnlockedStages.to_string(), "unlockedStages");
        assert_eq!(FieldKey::DailyScore.to_string(), "dailyScore");
    }

    #[test]
    fn field_key_parse_roundtrip() {
        for raw in [
            "RoadmapStage1",
            "RoadmapStage15",
            "TimeTrialStage12",
            "unlockedStages",
            "dailyScore",
            "freestyleScore",
            "lastDailyAnswerDate",
        ] {
            let key: FieldKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
    }

    #[test]
    fn field_key_rejects_unknown_and_out_of_range() {
        assert!("stage3".parse::<FieldKey>().is_err());
        assert!("DailyModePoints".parse::<FieldKey>().is_err());
        assert!("RoadmapStage16".parse::<FieldKey>().is_err());
        assert!("RoadmapStage".parse::<FieldKey>().is_err());
    }

    #[test]
    fn field_value_serializes_untagged() {
        let int = serde_json::to_value(FieldValue::Int(18)).unwrap();
        assert_eq!(int, serde_json::json!(18));

        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let serialized = serde_json::to_value(FieldValue::Date(date)).unwrap();
        assert_eq!(serialized, serde_json::json!("2024-05-01"));

        let back: FieldValue = serde_json::from_value(serialized).unwrap();
        assert_eq!(back.as_date(), Some(date));
    }

    #[test]
    fn field_map_serializes_with_wire_keys() {
        let mut map = FieldMap::new();
        let stage = StageKey::new(Category::TimeTrial, 7).unwrap();
        map.insert(FieldKey::Stage(stage), FieldValue::Int(9));
        map.insert(FieldKey::UnlockedStages, FieldValue::Int(4));

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"TimeTrialStage7": 9, "unlockedStages": 4})
        );

        let parsed: FieldMap = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, map);
    }
}
