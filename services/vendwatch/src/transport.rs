//! Transport trait for delivering messages to a recipient

use async_trait::async_trait;

use crate::error::DeliveryError;

/// Sends a rendered message to one chat
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `text` to `recipient`, classifying any failure
    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError>;
}
