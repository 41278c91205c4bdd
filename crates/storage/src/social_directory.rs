// Database-backed SocialDirectory implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use autopilot_core::{
    CollaboratorError, CollaboratorResult, NewSocialPost, SocialAccount, SocialDirectory,
    SocialPost,
};

use crate::repositories::Database;

fn upstream(e: anyhow::Error) -> CollaboratorError {
    CollaboratorError::Upstream(format!("{:#}", e))
}

/// Social posts and connected accounts stored in Postgres
#[derive(Clone)]
pub struct DbSocialDirectory {
    db: Database,
}

impl DbSocialDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SocialDirectory for DbSocialDirectory {
    async fn get_post(&self, post_id: Uuid) -> CollaboratorResult<Option<SocialPost>> {
        self.db
            .get_social_post(post_id)
            .await
            .map_err(upstream)?
            .map(|row| SocialPost::try_from(row).map_err(CollaboratorError::Upstream))
            .transpose()
    }

    async fn create_draft_post(&self, post: NewSocialPost) -> CollaboratorResult<SocialPost> {
        let row = self.db.create_draft_post(post).await.map_err(upstream)?;
        SocialPost::try_from(row).map_err(CollaboratorError::Upstream)
    }

    async fn list_active_accounts(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> CollaboratorResult<Vec<SocialAccount>> {
        Ok(self
            .db
            .list_active_social_accounts(user_id, platform)
            .await
            .map_err(upstream)?
            .into_iter()
            .map(SocialAccount::from)
            .collect())
    }

    async fn get_account(
        &self,
        user_id: Uuid,
        platform: &str,
        account_id: &str,
    ) -> CollaboratorResult<Option<SocialAccount>> {
        Ok(self
            .db
            .get_social_account(user_id, platform, account_id)
            .await
            .map_err(upstream)?
            .map(SocialAccount::from))
    }

    async fn mark_post_scheduled(
        &self,
        post_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> CollaboratorResult<()> {
        if self
            .db
            .mark_post_scheduled(post_id, scheduled_for)
            .await
            .map_err(upstream)?
        {
            Ok(())
        } else {
            Err(CollaboratorError::NotFound(format!("social post {}", post_id)))
        }
    }

    async fn mark_post_published(
        &self,
        post_id: Uuid,
        platform_post_id: &str,
    ) -> CollaboratorResult<()> {
        if self
            .db
            .mark_post_published(post_id, platform_post_id)
            .await
            .map_err(upstream)?
        {
            Ok(())
        } else {
            Err(CollaboratorError::NotFound(format!("social post {}", post_id)))
        }
    }
}
