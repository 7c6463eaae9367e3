mod error;
mod operations;
mod types;

pub use error::ActivityError;
pub use operations::{validate_activity, ActivityTransform};
pub use types::{
    Activity, ActivityId, ActivityMetadata, ActivityPatch, ActivityStatus, Category, NewActivity,
};
