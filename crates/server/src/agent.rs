//! Agent factory — the collaborator-facing entry point.
//!
//! Owns the injected adapter and persister plus an explicit session
//! registry. Collaborators create and look up sessions here; they never
//! touch the adapter or persister directly.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use tether_adapter_core::AgentAdapter;
use tether_protocol::{new_id, SessionOptions};

use crate::persist::{AgentPersister, PersistHandle};
use crate::session::{Session, SessionError};

pub struct Agent {
    adapter: Arc<dyn AgentAdapter>,
    persister: Arc<dyn AgentPersister>,
    persist: PersistHandle,
    sessions: DashMap<String, Arc<Session>>,
}

impl Agent {
    pub fn new(adapter: Arc<dyn AgentAdapter>, persister: Arc<dyn AgentPersister>) -> Self {
        let persist = PersistHandle::spawn(persister.clone());
        Self {
            adapter,
            persister,
            persist,
            sessions: DashMap::new(),
        }
    }

    /// Create a new session with a fresh id.
    pub async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<Session>, SessionError> {
        let id = new_id();
        let session = Session::open(
            id.clone(),
            options,
            self.adapter.clone(),
            self.persister.clone(),
            self.persist.clone(),
        )
        .await?;
        info!(
            component = "agent",
            event = "session.created",
            session_id = %id,
            provider = %self.adapter.name(),
            "Session created"
        );
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a live session, rehydrating from the store when the id is
    /// known but not resident.
    pub async fn get_session(&self, id: &str) -> Result<Option<Arc<Session>>, SessionError> {
        if let Some(session) = self.sessions.get(id) {
            return Ok(Some(session.clone()));
        }
        let Some(stored) = self
            .persister
            .get_session(id)
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?
        else {
            return Ok(None);
        };

        let options = SessionOptions {
            project_path: stored.cwd.clone(),
            ..Default::default()
        };
        let session = Session::open(
            stored.id.clone(),
            options,
            self.adapter.clone(),
            self.persister.clone(),
            self.persist.clone(),
        )
        .await?;
        self.sessions.insert(stored.id, session.clone());
        Ok(Some(session))
    }

    /// Sessions in last-activity order, sliced by limit/offset.
    pub async fn sessions(
        &self,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Arc<Session>>, SessionError> {
        let all = self
            .persister
            .get_all_sessions()
            .await
            .map_err(|e| SessionError::Persistence(e.to_string()))?;

        let mut result = Vec::new();
        for data in all.into_iter().skip(offset) {
            if let Some(limit) = limit {
                if result.len() >= limit {
                    break;
                }
            }
            if let Some(session) = self.get_session(&data.id).await? {
                result.push(session);
            }
        }
        Ok(result)
    }

    /// Delete a session and its durable copy.
    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        if let Some((_, session)) = self.sessions.remove(id) {
            match session.delete() {
                Ok(()) | Err(SessionError::AlreadyClosed { .. }) => {}
                Err(e) => return Err(e),
            }
        } else {
            self.persister
                .delete_session(id)
                .await
                .map_err(|e| SessionError::Persistence(e.to_string()))?;
        }
        info!(
            component = "agent",
            event = "session.deleted",
            session_id = %id,
            "Session deleted"
        );
        Ok(())
    }

    /// The write queue, exposed so tests can await durability.
    pub fn persist(&self) -> &PersistHandle {
        &self.persist
    }
}
