//! Subscriber store shared by the poll cycle and the command handler

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::state_store::write_atomic;

/// A chat that receives notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Set of recipients. Each operation is atomic on its own.
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Add a recipient, returning true if it was not subscribed before
    async fn add(&self, recipient: Recipient) -> crate::Result<bool>;

    /// Remove a recipient, returning true if it was subscribed
    async fn remove(&self, id: &str) -> crate::Result<bool>;

    async fn list(&self) -> crate::Result<Vec<Recipient>>;

    async fn count(&self) -> crate::Result<usize> {
        Ok(self.list().await?.len())
    }
}

fn insert(recipients: &mut Vec<Recipient>, recipient: Recipient) -> bool {
    match recipients.iter_mut().find(|r| r.id == recipient.id) {
        Some(existing) => {
            if recipient.display_name.is_some() {
                existing.display_name = recipient.display_name;
            }
            false
        }
        None => {
            recipients.push(recipient);
            true
        }
    }
}

fn delete(recipients: &mut Vec<Recipient>, id: &str) -> bool {
    let before = recipients.len();
    recipients.retain(|r| r.id != id);
    recipients.len() != before
}

/// In-memory recipient set
#[derive(Debug, Default)]
pub struct MemoryRecipientStore {
    recipients: RwLock<Vec<Recipient>>,
}

impl MemoryRecipientStore {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients: RwLock::new(recipients),
        }
    }
}

#[async_trait]
impl RecipientStore for MemoryRecipientStore {
    async fn add(&self, recipient: Recipient) -> crate::Result<bool> {
        Ok(insert(&mut *self.recipients.write().await, recipient))
    }

    async fn remove(&self, id: &str) -> crate::Result<bool> {
        Ok(delete(&mut *self.recipients.write().await, id))
    }

    async fn list(&self) -> crate::Result<Vec<Recipient>> {
        Ok(self.recipients.read().await.clone())
    }
}

/// Recipients persisted as a JSON array. Every operation re-reads the file
/// under a lock, so edits made while the service is stopped are picked up.
#[derive(Debug)]
pub struct JsonFileRecipientStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRecipientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> crate::Result<Vec<Recipient>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                crate::VendwatchError::Recipients(format!(
                    "Failed to parse {:?}: {}",
                    self.path, e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, recipients: &[Recipient]) -> crate::Result<()> {
        let json = serde_json::to_vec_pretty(recipients)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}

#[async_trait]
impl RecipientStore for JsonFileRecipientStore {
    async fn add(&self, recipient: Recipient) -> crate::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut recipients = self.read().await?;
        let added = insert(&mut recipients, recipient);
        self.write(&recipients).await?;
        Ok(added)
    }

    async fn remove(&self, id: &str) -> crate::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut recipients = self.read().await?;
        let removed = delete(&mut recipients, id);
        if removed {
            self.write(&recipients).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> crate::Result<Vec<Recipient>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }
}
