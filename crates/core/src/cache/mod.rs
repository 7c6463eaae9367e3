mod invalidation;
mod keys;

pub use invalidation::{plan_catch_up, plan_invalidation, CascadeTarget};
pub use keys::QueryKey;
