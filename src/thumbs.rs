//! Thumbnail generation for the gallery renderer.
//!
//! The renderer asks for `thumbs/<year>/<slug>/<id>.<ext>` first and falls
//! back to the full image, so thumbnails are optional and purely additive.
//! They are never part of the manifest and never deleted here.
//!
//! | Step | Implementation |
//! |---|---|
//! | Decode | `image::ImageReader` with content sniffing |
//! | Resize | `DynamicImage::resize` with `Lanczos3`, longer edge = `max_edge`, never upscaled |
//! | Encode | same format as the asset; JPEG at the configured quality |
//! | Write | [`store::write_atomic`] |
//!
//! Work is spread over the global rayon pool. Counters are folded on the
//! calling thread after the parallel pass.

use crate::config::ThumbnailsConfig;
use crate::naming;
use crate::store::{self, AssetIndex, MirrorStore, ScannedAsset, StoreError};
use crate::types::ItemFailure;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use rayon::prelude::*;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ThumbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("mirror error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct ThumbReport {
    pub generated: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

enum ThumbOutcome {
    Generated,
    Skipped,
}

/// Create every missing thumbnail for the indexed assets.
pub fn generate(store: &MirrorStore, index: &AssetIndex, config: &ThumbnailsConfig) -> ThumbReport {
    let assets: Vec<&ScannedAsset> = index.iter().collect();
    let results: Vec<(&ScannedAsset, Result<ThumbOutcome, ThumbError>)> = assets
        .par_iter()
        .map(|asset| (*asset, make_thumbnail(store, asset, config)))
        .collect();

    let mut report = ThumbReport::default();
    for (asset, result) in results {
        match result {
            Ok(ThumbOutcome::Generated) => report.generated += 1,
            Ok(ThumbOutcome::Skipped) => report.skipped += 1,
            Err(e) => {
                warn!(id = %asset.id, path = %asset.rel_path, error = %e, "thumbnail failed");
                report.failures.push(ItemFailure::new(&asset.id, e));
            }
        }
    }
    info!(
        generated = report.generated,
        skipped = report.skipped,
        failed = report.failures.len(),
        "thumbnails done"
    );
    report
}

fn make_thumbnail(
    store: &MirrorStore,
    asset: &ScannedAsset,
    config: &ThumbnailsConfig,
) -> Result<ThumbOutcome, ThumbError> {
    let thumb_rel = naming::thumb_path_for(&asset.rel_path);
    if store.asset_exists(&thumb_rel) {
        return Ok(ThumbOutcome::Skipped);
    }

    let img = ImageReader::open(store.path_of(&asset.rel_path))?
        .with_guessed_format()?
        .decode()?;
    let thumb = fit_within(img, config.max_edge);
    let bytes = encode(&thumb, &asset.extension, config.quality)?;
    store::write_atomic(&store.path_of(&thumb_rel), &bytes)?;
    debug!(id = %asset.id, path = %thumb_rel, "thumbnail written");
    Ok(ThumbOutcome::Generated)
}

/// Downscale so the longer edge is at most `max_edge`, keeping aspect ratio.
pub fn fit_within(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_edge {
        return img;
    }
    img.resize(max_edge, max_edge, FilterType::Lanczos3)
}

/// Encode in the format named by a normalized extension.
fn encode(img: &DynamicImage, extension: &str, quality: u8) -> Result<Vec<u8>, ThumbError> {
    let mut buf = Cursor::new(Vec::new());
    match extension {
        "png" => img.write_to(&mut buf, ImageFormat::Png)?,
        "webp" => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::WebP)?,
        "gif" => DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buf, ImageFormat::Gif)?,
        _ => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    fn config() -> ThumbnailsConfig {
        ThumbnailsConfig {
            enabled: true,
            max_edge: 480,
            quality: 85,
        }
    }

    /// Write a synthetic image of the given size under `root`.
    fn create_image(root: &Path, rel: &str, width: u32, height: u32, format: ImageFormat) {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        DynamicImage::ImageRgb8(img).save_with_format(path, format).unwrap();
    }

    fn run(root: &Path) -> ThumbReport {
        let store = MirrorStore::new(root);
        let index = store.scan_assets().unwrap();
        generate(&store, &index, &config())
    }

    #[test]
    fn large_jpeg_is_downscaled() {
        let tmp = TempDir::new().unwrap();
        create_image(tmp.path(), "full/2024/match/7.jpg", 960, 480, ImageFormat::Jpeg);

        let report = run(tmp.path());

        assert_eq!(report.generated, 1);
        let dims = image::image_dimensions(tmp.path().join("thumbs/2024/match/7.jpg")).unwrap();
        assert_eq!(dims, (480, 240));
    }

    #[test]
    fn small_png_is_not_upscaled() {
        let tmp = TempDir::new().unwrap();
        create_image(tmp.path(), "full/2023/other/3.png", 100, 50, ImageFormat::Png);

        run(tmp.path());

        let thumb = tmp.path().join("thumbs/2023/other/3.png");
        assert_eq!(image::image_dimensions(&thumb).unwrap(), (100, 50));
        assert_eq!(
            image::ImageFormat::from_path(&thumb).unwrap(),
            ImageFormat::Png
        );
    }

    #[test]
    fn existing_thumbnail_is_skipped() {
        let tmp = TempDir::new().unwrap();
        create_image(tmp.path(), "full/2024/match/7.jpg", 600, 600, ImageFormat::Jpeg);
        write_file(tmp.path(), "thumbs/2024/match/7.jpg", b"keep me");

        let report = run(tmp.path());

        assert_eq!(report.skipped, 1);
        assert_eq!(
            std::fs::read(tmp.path().join("thumbs/2024/match/7.jpg")).unwrap(),
            b"keep me"
        );
    }

    #[test]
    fn undecodable_asset_is_a_failure_not_a_panic() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "full/2024/match/1.jpg", b"not an image");
        create_image(tmp.path(), "full/2024/match/2.jpg", 10, 10, ImageFormat::Jpeg);

        let report = run(tmp.path());

        assert_eq!(report.generated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "1");
        assert!(!tmp.path().join("thumbs/2024/match/1.jpg").exists());
    }

    #[test]
    fn fit_within_keeps_portrait_ratio() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(300, 900));
        let fitted = fit_within(img, 480);
        assert_eq!((fitted.width(), fitted.height()), (160, 480));
    }
}
