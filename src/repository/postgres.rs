use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ImageRepository, NewImage, UserRepository};
use crate::error::RepositoryError;
use crate::model::{Image, ImageUpdate, User};

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const IMAGE_COLUMNS: &str = "id, user_id, image_url, filename, format, alt, created_at, updated_at";

/// PostgreSQL repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `users` and `images` tables if they do not exist.
    pub async fn apply_schema(&self) -> Result<(), RepositoryError> {
        (&self.pool).execute(include_str!("schema.sql")).await?;
        debug!("Database schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn image_from_row(row: &PgRow) -> Result<Image, RepositoryError> {
    Ok(Image {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("image_url")?,
        filename: row.try_get("filename")?,
        format: row.try_get("format")?,
        alt: row.try_get("alt")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ImageRepository for PgRepository {
    async fn find_image_by_id(&self, id: i64, user_id: Uuid) -> Result<Image, RepositoryError> {
        let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1 AND user_id = $2");

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::ImageNotFound { id, user_id })?;

        image_from_row(&row)
    }

    async fn find_image_by_filename(
        &self,
        filename: &str,
        user_id: Uuid,
    ) -> Result<Image, RepositoryError> {
        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE filename = $1 AND user_id = $2 \
            ORDER BY id LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(filename)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::FilenameNotFound {
                filename: filename.to_string(),
                user_id,
            })?;

        image_from_row(&row)
    }

    async fn create_image(&self, new: NewImage) -> Result<Image, RepositoryError> {
        let sql = format!(
            "INSERT INTO images (user_id, image_url, filename, format, alt) \
            VALUES ($1, $2, $3, $4, $5) \
            RETURNING {IMAGE_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(new.user_id)
            .bind(&new.url)
            .bind(&new.filename)
            .bind(&new.format)
            .bind(&new.alt)
            .fetch_one(&self.pool)
            .await?;

        image_from_row(&row)
    }

    async fn update_image(
        &self,
        id: i64,
        user_id: Uuid,
        update: ImageUpdate,
    ) -> Result<Image, RepositoryError> {
        let sql = format!(
            "UPDATE images \
                SET image_url = $1, filename = $2, format = $3, alt = $4, updated_at = NOW() \
            WHERE id = $5 AND user_id = $6 \
            RETURNING {IMAGE_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&update.url)
            .bind(&update.filename)
            .bind(&update.format)
            .bind(&update.alt)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::ImageNotFound { id, user_id })?;

        image_from_row(&row)
    }
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, username, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::UserNotFound(id))?;

        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
