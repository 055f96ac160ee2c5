use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ImageRepository, NewImage, UserRepository};
use crate::error::RepositoryError;
use crate::model::{Image, ImageUpdate, User};

/// In-process repository.
///
/// Ids are assigned sequentially from 1. Counts of successful updates are
/// kept so callers can verify that nothing was written.
#[derive(Default)]
pub struct MemoryRepository {
    images: RwLock<HashMap<i64, Image>>,
    users: RwLock<HashMap<Uuid, User>>,
    next_id: AtomicI64,
    updates: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return it.
    pub async fn insert_user(&self, username: impl Into<String>) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            created_at: now,
            updated_at: now,
        };
        self.users.write().await.insert(user.id, user.clone());
        user
    }

    /// Store a new image record and return it with its assigned id.
    pub async fn insert_image(&self, new: NewImage) -> Image {
        let now = Utc::now();
        let image = Image {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: new.user_id,
            url: new.url,
            filename: new.filename,
            format: new.format,
            alt: new.alt,
            created_at: now,
            updated_at: now,
        };
        self.images.write().await.insert(image.id, image.clone());
        image
    }

    /// Number of successful `update_image` calls.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn find_image_by_id(&self, id: i64, user_id: Uuid) -> Result<Image, RepositoryError> {
        self.images
            .read()
            .await
            .get(&id)
            .filter(|img| img.user_id == user_id)
            .cloned()
            .ok_or(RepositoryError::ImageNotFound { id, user_id })
    }

    async fn find_image_by_filename(
        &self,
        filename: &str,
        user_id: Uuid,
    ) -> Result<Image, RepositoryError> {
        self.images
            .read()
            .await
            .values()
            .filter(|img| img.user_id == user_id && img.filename == filename)
            .min_by_key(|img| img.id)
            .cloned()
            .ok_or_else(|| RepositoryError::FilenameNotFound {
                filename: filename.to_string(),
                user_id,
            })
    }

    async fn create_image(&self, new: NewImage) -> Result<Image, RepositoryError> {
        Ok(self.insert_image(new).await)
    }

    async fn update_image(
        &self,
        id: i64,
        user_id: Uuid,
        update: ImageUpdate,
    ) -> Result<Image, RepositoryError> {
        let mut images = self.images.write().await;
        let image = images
            .get_mut(&id)
            .filter(|img| img.user_id == user_id)
            .ok_or(RepositoryError::ImageNotFound { id, user_id })?;

        image.url = update.url;
        image.filename = update.filename;
        image.format = update.format;
        image.alt = update.alt;
        image.updated_at = Utc::now();

        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::UserNotFound(id))
    }
}
