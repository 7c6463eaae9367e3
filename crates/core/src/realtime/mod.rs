mod error;
mod traits;
mod types;

pub use error::{FeedError, Result};
pub use traits::ChangeFeed;
pub use types::{ActivityChange, ChangeEvent, ChangeKind, StateChange, Transition};
