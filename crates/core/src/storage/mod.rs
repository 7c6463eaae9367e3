mod error;
mod traits;
mod types;

pub use error::{DateRangeError, RepositoryError, Result};
pub use traits::{ActivityRepository, CategoryRepository, Repository};
pub use types::DateRange;
