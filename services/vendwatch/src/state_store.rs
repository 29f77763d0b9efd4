//! Durable monitor state: the sales cursor and the committed alert counts

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Everything that has already been notified, as of the last committed tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    #[serde(default)]
    pub last_processed_sale_id: Option<String>,
    #[serde(default)]
    pub terminal_alert_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub last_check_epoch_ms: Option<u64>,
}

/// Singleton storage for [`MonitorState`], read at startup and replaced
/// wholesale on every commit.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> crate::Result<MonitorState>;

    async fn save(&self, state: &MonitorState) -> crate::Result<()>;
}

/// JSON file store with atomic replacement
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> crate::Result<MonitorState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let state: MonitorState = serde_json::from_str(&content)?;
                tracing::debug!(
                    "Loaded state from {:?}: cursor={:?}, {} alerts",
                    self.path,
                    state.last_processed_sale_id,
                    state.terminal_alert_counts.len()
                );
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file at {:?}, starting empty", self.path);
                Ok(MonitorState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &MonitorState) -> crate::Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json).await?;
        tracing::debug!("Saved state to {:?}", self.path);
        Ok(())
    }
}

/// Write `contents` next to `path` and rename it into place, so readers
/// only ever see the old or the new file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await
}

/// In-memory store, mainly for tests. Saves can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: RwLock<MonitorState>,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new(state: MonitorState) -> Self {
        Self {
            state: RwLock::new(state),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> MonitorState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> crate::Result<MonitorState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &MonitorState) -> crate::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(crate::VendwatchError::State(
                "state store is not writable".to_string(),
            ));
        }
        *self.state.write().await = state.clone();
        Ok(())
    }
}
