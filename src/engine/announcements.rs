use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::required_text;
use super::{Engine, EngineError};

impl Engine {
    pub async fn post_announcement(&self, content: &str) -> Result<Announcement, EngineError> {
        let content = content.to_owned();
        self.run_detached(|engine| async move { engine.post_announcement_inner(&content).await })
            .await
    }

    async fn post_announcement_inner(&self, content: &str) -> Result<Announcement, EngineError> {
        let content = required_text("content", content, MAX_ANNOUNCEMENT_LEN)?;

        let _gate = self.commit_gate.read().await;
        let mut announcements = self.announcements.lock().await;
        if announcements.len() >= MAX_ANNOUNCEMENTS {
            return Err(EngineError::LimitExceeded("too many announcements"));
        }
        let announcement = Announcement {
            id: self.next_id(),
            content,
            active: true,
            created_at: self.clock.now(),
        };
        self.wal_append(&Event::AnnouncementPosted {
            announcement: announcement.clone(),
        })
        .await?;
        announcements.insert(announcement.id, announcement.clone());
        tracing::info!("announcement {} posted", announcement.id);
        Ok(announcement)
    }

    /// Newest first.
    pub async fn list_announcements(&self, active_only: bool) -> Vec<Announcement> {
        self.announcements
            .lock()
            .await
            .values()
            .rev()
            .filter(|a| !active_only || a.active)
            .cloned()
            .collect()
    }

    pub async fn set_announcement_active(
        &self,
        id: Ulid,
        active: bool,
    ) -> Result<Announcement, EngineError> {
        self.run_detached(|engine| async move {
            engine.set_announcement_active_inner(id, active).await
        })
        .await
    }

    async fn set_announcement_active_inner(
        &self,
        id: Ulid,
        active: bool,
    ) -> Result<Announcement, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut announcements = self.announcements.lock().await;
        let current = announcements.get(&id).ok_or(EngineError::NotFound(id))?;
        if current.active == active {
            return Ok(current.clone());
        }
        self.wal_append(&Event::AnnouncementToggled { id, active }).await?;
        let announcement = announcements.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        announcement.active = active;
        tracing::info!("announcement {id} active={active}");
        Ok(announcement.clone())
    }

    pub async fn delete_announcement(&self, id: Ulid) -> Result<Announcement, EngineError> {
        self.run_detached(|engine| async move { engine.delete_announcement_inner(id).await })
            .await
    }

    async fn delete_announcement_inner(&self, id: Ulid) -> Result<Announcement, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut announcements = self.announcements.lock().await;
        if !announcements.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::AnnouncementDeleted { id }).await?;
        let removed = announcements.remove(&id).ok_or(EngineError::NotFound(id))?;
        tracing::info!("announcement {id} deleted");
        Ok(removed)
    }
}
