use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::category::Category;
use crate::model::field::{FieldKey, FieldMap, FieldValue, StageKey};
use crate::model::mutation::PendingMutation;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("score {score} for {stage} exceeds the stage maximum {max}")]
    ScoreOutOfRange {
        stage: StageKey,
        score: u32,
        max: u32,
    },

    #[error("unlocked stage level {level} is outside 1..={max}")]
    UnlockOutOfRange { level: u32, max: u32 },

    #[error("field {field} carries a value of the wrong type")]
    WrongValueType { field: FieldKey },
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// The best-known copy of one user's scores and unlock level.
///
/// This is the value published to observers: every accessor hands out copies,
/// so readers never see a half-applied mutation. All writes go through
/// [`ProgressSnapshot::apply`], which validates the whole mutation before
/// touching any field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    stage_scores: BTreeMap<StageKey, u32>,
    unlocked_stages: u32,
    daily_score: u32,
    freestyle_score: u32,
    last_daily_answer: Option<NaiveDate>,
}

impl ProgressSnapshot {
    /// Highest value `unlockedStages` may hold: one past the last roadmap
    /// stage, meaning everything is unlocked.
    #[must_use]
    pub fn max_unlocked_stages() -> u32 {
        u32::from(Category::Roadmap.stage_count()) + 1
    }

    /// A snapshot with no recorded scores and only the first stage unlocked.
    ///
    /// This is the fallback when no local state exists yet (first launch,
    /// fresh sign-in) or when the cache is unreadable.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            stage_scores: BTreeMap::new(),
            unlocked_stages: 1,
            daily_score: 0,
            freestyle_score: 0,
            last_daily_answer: None,
        }
    }

    /// Rehydrates a snapshot from a flat field map (a cached record or a
    /// remote document).
    ///
    /// Fields absent from the map keep their zero-valued defaults.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if any field value is mistyped or out of range.
    pub fn from_fields(fields: &FieldMap) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::zeroed();
        snapshot.apply_fields(fields)?;
        Ok(snapshot)
    }

    /// Flattens the snapshot into its wire representation.
    ///
    /// Only stages with a recorded score appear; counters and the unlock
    /// level are always present.
    #[must_use]
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        for (stage, score) in &self.stage_scores {
            fields.insert(FieldKey::Stage(*stage), FieldValue::Int(*score));
        }
        fields.insert(FieldKey::UnlockedStages, FieldValue::Int(self.unlocked_stages));
        fields.insert(FieldKey::DailyScore, FieldValue::Int(self.daily_score));
        fields.insert(
            FieldKey::FreestyleScore,
            FieldValue::Int(self.freestyle_score),
        );
        if let Some(date) = self.last_daily_answer {
            fields.insert(FieldKey::LastDailyAnswerDate, FieldValue::Date(date));
        }
        fields
    }

    /// Applies a partial update, validating every field before writing any.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` without modifying the snapshot if any field is
    /// mistyped or out of range.
    pub fn apply(&mut self, mutation: &PendingMutation) -> Result<(), SnapshotError> {
        self.apply_fields(mutation.fields())
    }

    fn apply_fields(&mut self, fields: &FieldMap) -> Result<(), SnapshotError> {
        for (key, value) in fields {
            Self::validate_field(*key, *value)?;
        }
        for (key, value) in fields {
            match (key, value) {
                (FieldKey::Stage(stage), FieldValue::Int(score)) => {
                    self.stage_scores.insert(*stage, *score);
                }
                (FieldKey::UnlockedStages, FieldValue::Int(level)) => {
                    self.unlocked_stages = *level;
                }
                (FieldKey::DailyScore, FieldValue::Int(score)) => {
                    self.daily_score = *score;
                }
                (FieldKey::FreestyleScore, FieldValue::Int(score)) => {
                    self.freestyle_score = *score;
                }
                (FieldKey::LastDailyAnswerDate, FieldValue::Date(date)) => {
                    self.last_daily_answer = Some(*date);
                }
                // validate_field already rejected mistyped pairs
                _ => unreachable!("validated above"),
            }
        }
        Ok(())
    }

    fn validate_field(key: FieldKey, value: FieldValue) -> Result<(), SnapshotError> {
        match key {
            FieldKey::Stage(stage) => {
                let score = value
                    .as_int()
                    .ok_or(SnapshotError::WrongValueType { field: key })?;
                if score > stage.max_score() {
                    return Err(SnapshotError::ScoreOutOfRange {
                        stage,
                        score,
                        max: stage.max_score(),
                    });
                }
            }
            FieldKey::UnlockedStages => {
                let level = value
                    .as_int()
                    .ok_or(SnapshotError::WrongValueType { field: key })?;
                if level == 0 || level > Self::max_unlocked_stages() {
                    return Err(SnapshotError::UnlockOutOfRange {
                        level,
                        max: Self::max_unlocked_stages(),
                    });
                }
            }
            FieldKey::DailyScore | FieldKey::FreestyleScore => {
                value
                    .as_int()
                    .ok_or(SnapshotError::WrongValueType { field: key })?;
            }
            FieldKey::LastDailyAnswerDate => {
                value
                    .as_date()
                    .ok_or(SnapshotError::WrongValueType { field: key })?;
            }
        }
        Ok(())
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────
    //

    /// Recorded score for a stage; zero when never attempted.
    #[must_use]
    pub fn stage_score(&self, stage: StageKey) -> u32 {
        self.stage_scores.get(&stage).copied().unwrap_or(0)
    }

    /// All recorded stage scores for one category, in stage order.
    #[must_use]
    pub fn category_scores(&self, category: Category) -> Vec<(StageKey, u32)> {
        self.stage_scores
            .iter()
            .filter(|(stage, _)| stage.category() == category)
            .map(|(stage, score)| (*stage, *score))
            .collect()
    }

    #[must_use]
    pub fn unlocked_stages(&self) -> u32 {
        self.unlocked_stages
    }

    #[must_use]
    pub fn daily_score(&self) -> u32 {
        self.daily_score
    }

    #[must_use]
    pub fn freestyle_score(&self) -> u32 {
        self.freestyle_score
    }

    #[must_use]
    pub fn last_daily_answer(&self) -> Option<NaiveDate> {
        self.last_daily_answer
    }

    //
    // ─── BREAKDOWNS ────────────────────────────────────────────────────────
    //

    /// Sum of recorded scores in one category.
    #[must_use]
    pub fn category_total(&self, category: Category) -> u32 {
        self.stage_scores
            .iter()
            .filter(|(stage, _)| stage.category() == category)
            .map(|(_, score)| score)
            .sum()
    }

    /// Category total against its fixed maximum.
    #[must_use]
    pub fn breakdown(&self, category: Category) -> CategoryBreakdown {
        CategoryBreakdown {
            score: self.category_total(category),
            max: category.max_total_score(),
        }
    }

    /// Total across every category against the combined maximum.
    #[must_use]
    pub fn overall_breakdown(&self) -> CategoryBreakdown {
        let mut score = 0;
        let mut max = 0;
        for category in Category::ALL {
            score += self.category_total(category);
            max += category.max_total_score();
        }
        CategoryBreakdown { score, max }
    }
}

/// Summed score against a fixed maximum, with a derived percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryBreakdown {
    score: u32,
    max: u32,
}

impl CategoryBreakdown {
    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn max(&self) -> u32 {
        self.max
    }

    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.score) / f64::from(self.max) * 100.0
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
