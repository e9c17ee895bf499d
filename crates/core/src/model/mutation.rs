use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::field::{FieldKey, FieldMap, FieldValue, StageKey};

/// A single deferred write: a partial update touching only the fields present.
///
/// Mutations are replayed against the remote store in strict enqueue order
/// and are never coalesced — two mutations touching the same key both reach
/// the store, so the later value wins only because it is replayed later.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingMutation {
    fields: FieldMap,
}

impl PendingMutation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutation setting one stage score.
    #[must_use]
    pub fn stage_score(stage: StageKey, score: u32) -> Self {
        Self::new().with(FieldKey::Stage(stage), FieldValue::Int(score))
    }

    /// Mutation moving the unlock level.
    #[must_use]
    pub fn unlock(level: u32) -> Self {
        Self::new().with(FieldKey::UnlockedStages, FieldValue::Int(level))
    }

    /// Mutation recording a daily answer: the date marker, plus the new
    /// counter value when the answer scored.
    #[must_use]
    pub fn daily_answer(date: NaiveDate, new_daily_score: Option<u32>) -> Self {
        let mut mutation = Self::new().with(FieldKey::LastDailyAnswerDate, FieldValue::Date(date));
        if let Some(score) = new_daily_score {
            mutation.set(FieldKey::DailyScore, FieldValue::Int(score));
        }
        mutation
    }

    /// Mutation setting the freestyle counter.
    #[must_use]
    pub fn freestyle_score(score: u32) -> Self {
        Self::new().with(FieldKey::FreestyleScore, FieldValue::Int(score))
    }

    /// Builder-style field insertion; a later value for the same key replaces
    /// the earlier one within this mutation.
    #[must_use]
    pub fn with(mut self, key: FieldKey, value: FieldValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: FieldKey, value: FieldValue) {
        self.fields.insert(key, value);
    }

    #[must_use]
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    #[must_use]
    pub fn into_fields(self) -> FieldMap {
        self.fields
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::category::Category;

    #[test]
    fn stage_score_mutation_touches_one_field() {
        let stage = StageKey::new(Category::Roadmap, 3).unwrap();
        let mutation = PendingMutation::stage_score(stage, 18);
        assert_eq!(mutation.len(), 1);
        assert_eq!(
            mutation.fields().get(&FieldKey::Stage(stage)),
            Some(&FieldValue::Int(18))
        );
    }

    #[test]
    fn daily_answer_without_score_only_marks_date() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mutation = PendingMutation::daily_answer(date, None);
        assert_eq!(mutation.len(), 1);
        assert_eq!(
            mutation.fields().get(&FieldKey::LastDailyAnswerDate),
            Some(&FieldValue::Date(date))
        );

        let scored = PendingMutation::daily_answer(date, Some(6));
        assert_eq!(scored.len(), 2);
    }

    #[test]
    fn serde_roundtrip_preserves_fields() {
        let stage = StageKey::new(Category::TimeTrial, 12).unwrap();
        let mutation = PendingMutation::stage_score(stage, 9).with(
            FieldKey::UnlockedStages,
            FieldValue::Int(4),
        );

        let json = serde_json::to_string(&mutation).unwrap();
        let back: PendingMutation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mutation);
    }
}
