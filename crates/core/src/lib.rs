#![forbid(unsafe_code)]

pub mod model;
pub mod time;

pub use model::{
    Category, CategoryBreakdown, FieldError, FieldKey, FieldMap, FieldValue, ParseCategoryError,
    ParseFieldKeyError, PendingMutation, ProgressSnapshot, SnapshotError, StageKey, UserId,
    UserIdError,
};
pub use time::Clock;
