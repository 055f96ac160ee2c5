//! Image and user metadata.
//!
//! Workers look images up by `(id, owner)` and overwrite the URL, filename,
//! format and alt text after a successful transformation. Uploads look up
//! `(filename, owner)` and create a record only when none exists. The HTTP
//! layer checks that the requesting user exists.
//!
//! # Backends
//!
//! - [`PgRepository`]: PostgreSQL via sqlx
//! - [`MemoryRepository`]: in-process maps, for development and tests

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::model::{Image, ImageUpdate, User};

pub use memory::MemoryRepository;
pub use postgres::{PgRepository, DEFAULT_MAX_CONNECTIONS};

/// Fields for a new image record.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub user_id: Uuid,
    pub url: String,
    pub filename: String,
    pub format: String,
    pub alt: String,
}

/// Image metadata access.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Find image `id` owned by `user_id`.
    ///
    /// Returns [`RepositoryError::ImageNotFound`] when the image does not
    /// exist or belongs to someone else.
    async fn find_image_by_id(&self, id: i64, user_id: Uuid) -> Result<Image, RepositoryError>;

    /// Find the image stored as `filename` for `user_id`.
    ///
    /// Returns [`RepositoryError::FilenameNotFound`] when there is none.
    async fn find_image_by_filename(
        &self,
        filename: &str,
        user_id: Uuid,
    ) -> Result<Image, RepositoryError>;

    /// Insert a record and return it with its assigned id and timestamps.
    async fn create_image(&self, new: NewImage) -> Result<Image, RepositoryError>;

    /// Overwrite the mutable fields of image `id` and bump `updated_at`.
    async fn update_image(
        &self,
        id: i64,
        user_id: Uuid,
        update: ImageUpdate,
    ) -> Result<Image, RepositoryError>;
}

/// User lookup.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, RepositoryError>;
}
