use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ChangeEvent, Result};

/// Push channel delivering changes committed by any session.
///
/// A subscription ends when the returned receiver reports
/// [`broadcast::error::RecvError::Closed`]; callers resubscribe to reconnect.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription for activity changes.
    async fn subscribe(&self) -> Result<broadcast::Receiver<ChangeEvent>>;
}
