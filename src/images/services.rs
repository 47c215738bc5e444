use anyhow::Context;
use bytes::Bytes;
use image::ImageFormat;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::traveler::repo_types::{Spot, SpotLookup};

const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// An upload that decoded as a supported raster image.
#[derive(Debug)]
pub struct CheckedImage {
    pub body: Bytes,
    pub format: ImageFormat,
}

impl CheckedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        ext_for(self.format)
    }
}

fn ext_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        _ => "bin",
    }
}

fn is_supported(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp
    )
}

/// Sniffs and fully decodes `body`; anything else is a validation error on `image`.
pub fn check_image(body: Bytes) -> Result<CheckedImage, AppError> {
    let format = image::guess_format(&body)
        .ok()
        .filter(|f| is_supported(*f))
        .ok_or_else(|| AppError::invalid("image", INVALID_IMAGE))?;
    if let Err(e) = image::load_from_memory_with_format(&body, format) {
        warn!(error = %e, ?format, "image failed to decode");
        return Err(AppError::invalid("image", INVALID_IMAGE));
    }
    Ok(CheckedImage { body, format })
}

/// Object key under which a spot image is stored.
fn object_key(img: &CheckedImage) -> String {
    format!("uploads/spot/{}.{}", Uuid::new_v4(), img.extension())
}

/// Validates `body`, stores it and points the caller's spot `spot_id` at it.
pub async fn attach_image(
    state: &AppState,
    caller: i64,
    spot_id: i64,
    body: Bytes,
) -> Result<Spot, AppError> {
    if state
        .store
        .find_spot(caller, SpotLookup::Id(spot_id))
        .await?
        .is_none()
    {
        return Err(AppError::NotFound);
    }
    let img = check_image(body)?;
    let key = object_key(&img);
    state
        .storage
        .put_object(&key, img.body.clone(), img.content_type())
        .await
        .with_context(|| format!("put_object {}", key))?;

    let Some((spot, previous)) = state.store.set_spot_image(caller, spot_id, &key).await? else {
        // spot vanished between the check and the write
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, %key, "orphaned image left in storage");
        }
        return Err(AppError::NotFound);
    };

    if let Some(old) = previous.filter(|old| *old != key) {
        if let Err(e) = state.storage.delete_object(&old).await {
            warn!(error = %e, key = %old, "failed to delete replaced image");
        }
    }
    info!(caller, spot_id, %key, "spot image stored");
    Ok(spot)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::traveler::repo_types::SpotDraft;

    pub(crate) fn png_bytes() -> Bytes {
        let img = image::RgbImage::new(10, 10);
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        Bytes::from(out.into_inner())
    }

    async fn spot_for(state: &AppState, owner: i64) -> Spot {
        state
            .store
            .insert_spot(
                owner,
                &SpotDraft {
                    title: "Sample spot".into(),
                    time_minutes: 10,
                    price: "5.00".parse().unwrap(),
                    link: None,
                    tags: vec![],
                    locations: vec![],
                    ingredients: vec![],
                },
            )
            .await
            .unwrap()
    }

    #[test]
    fn extensions_follow_format() {
        assert_eq!(ext_for(ImageFormat::Jpeg), "jpg");
        assert_eq!(ext_for(ImageFormat::Png), "png");
        assert_eq!(ext_for(ImageFormat::WebP), "webp");
        assert_eq!(ext_for(ImageFormat::Tiff), "bin");
    }

    #[test]
    fn check_image_accepts_png_and_rejects_text() {
        let img = check_image(png_bytes()).unwrap();
        assert_eq!(img.format, ImageFormat::Png);
        assert_eq!(img.content_type(), "image/png");

        let err = check_image(Bytes::from_static(b"notimage")).unwrap_err();
        let AppError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.get("image").unwrap(), &[INVALID_IMAGE.to_string()]);
    }

    #[test]
    fn truncated_image_is_rejected() {
        let png = png_bytes();
        assert!(check_image(png.slice(..png.len() / 2)).is_err());
    }

    #[tokio::test]
    async fn attach_stores_object_and_replaces_previous() {
        let (state, storage) = AppState::fake_with_storage();
        let spot = spot_for(&state, 1).await;

        let first = attach_image(&state, 1, spot.id, png_bytes()).await.unwrap();
        let first_key = first.image.clone().unwrap();
        assert!(first_key.starts_with("uploads/spot/"));
        assert!(first_key.ends_with(".png"));
        assert!(storage.get(&first_key).await.is_some());

        let second = attach_image(&state, 1, spot.id, png_bytes()).await.unwrap();
        let second_key = second.image.unwrap();
        assert_ne!(first_key, second_key);
        assert!(storage.get(&first_key).await.is_none());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn attach_to_foreign_spot_is_not_found() {
        let (state, storage) = AppState::fake_with_storage();
        let spot = spot_for(&state, 1).await;
        let err = attach_image(&state, 2, spot.id, png_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn invalid_upload_stores_nothing() {
        let (state, storage) = AppState::fake_with_storage();
        let spot = spot_for(&state, 1).await;
        assert!(attach_image(&state, 1, spot.id, Bytes::from_static(b"notimage"))
            .await
            .is_err());
        assert_eq!(storage.len().await, 0);
    }
}
