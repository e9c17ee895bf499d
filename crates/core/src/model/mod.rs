mod category;
mod field;
mod mutation;
mod snapshot;
mod user;

pub use category::{Category, ParseCategoryError};
pub use field::{FieldError, FieldKey, FieldMap, FieldValue, ParseFieldKeyError, StageKey};
pub use mutation::PendingMutation;
pub use snapshot::{CategoryBreakdown, ProgressSnapshot, SnapshotError};
pub use user::{UserId, UserIdError};
