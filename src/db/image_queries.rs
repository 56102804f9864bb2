use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::asset::InputImage;

/// Look up an uploaded source image.
pub async fn get_image(pool: &PgPool, image_id: Uuid) -> Result<Option<InputImage>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT image_id, user_id, storage_path, filename, filesize_bytes, format,
               width, height, uploaded_at
        FROM images
        WHERE image_id = $1
        "#,
    )
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(InputImage {
            image_id: r.try_get("image_id")?,
            user_id: r.try_get("user_id")?,
            storage_path: r.try_get("storage_path")?,
            filename: r.try_get("filename")?,
            filesize_bytes: r.try_get("filesize_bytes")?,
            format: r.try_get("format")?,
            width: r.try_get("width")?,
            height: r.try_get("height")?,
            uploaded_at: r.try_get("uploaded_at")?,
        })
    })
    .transpose()
}
