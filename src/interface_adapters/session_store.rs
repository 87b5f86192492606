use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::entities::Session;
use crate::domain::ports::SessionStore;

// In-memory session store adapter; the default when no session file is configured.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    pub session: Arc<Mutex<Option<Session>>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> Result<Option<Session>, String> {
        let session = self.session.lock().await;
        Ok(session.clone())
    }

    async fn save(&self, session: &Session) -> Result<(), String> {
        let mut slot = self.session.lock().await;
        *slot = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), String> {
        let mut slot = self.session.lock().await;
        *slot = None;
        Ok(())
    }
}

// JSON file holding the last session so a restart can resume it.
#[derive(Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<Session>, String> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(format!("read {}: {err}", self.path.display())),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| format!("decode {}: {err}", self.path.display()))
    }

    async fn save(&self, session: &Session) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| format!("create {}: {err}", parent.display()))?;
        }
        let raw = serde_json::to_vec_pretty(session).map_err(|err| err.to_string())?;

        // Write then rename so a crash never leaves a torn file behind.
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, raw)
            .await
            .map_err(|err| format!("write {}: {err}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| format!("rename {}: {err}", self.path.display()))?;
        debug!(path = %self.path.display(), "session persisted");
        Ok(())
    }

    async fn clear(&self) -> Result<(), String> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(format!("remove {}: {err}", self.path.display())),
        }
    }
}
