//! FrameLoader tests.

use std::fs;

use framecache::{FrameCacheError, FrameLoader};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

#[tokio::test]
async fn load_decodes_complete_image() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("frame.png");

    let mut pixels = RgbImage::new(6, 4);
    pixels.put_pixel(5, 3, Rgb([200, 10, 30]));
    DynamicImage::ImageRgb8(pixels)
        .save(&path)
        .expect("Failed to write frame");

    let image = FrameLoader.load(&path).await.expect("Failed to load frame");
    assert_eq!(image.dimensions(), (6, 4));
    assert_eq!(image.to_rgb8().get_pixel(5, 3), &Rgb([200, 10, 30]));
}

#[tokio::test]
async fn load_detects_format_from_content() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let png = directory.path().join("frame.png");
    DynamicImage::new_rgb8(3, 3).save(&png).unwrap();

    // The decoder writes `.jpg` files, but the bytes decide.
    let misnamed = directory.path().join("frame.jpg");
    fs::copy(&png, &misnamed).unwrap();

    let image = FrameLoader.load(&misnamed).await.unwrap();
    assert_eq!(image.dimensions(), (3, 3));
}

#[tokio::test]
async fn corrupt_data_is_image_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("broken.jpg");
    fs::write(&path, b"\xFF\xD8\xFF garbage").unwrap();

    let result = FrameLoader.load(&path).await;
    assert!(matches!(result, Err(FrameCacheError::Image(_))));
}

#[tokio::test]
async fn missing_file_is_io_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let result = FrameLoader.load(&directory.path().join("absent.jpg")).await;
    assert!(matches!(result, Err(FrameCacheError::Io(_))));
}

#[test]
fn blocking_load_matches_async_load() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("frame.png");
    DynamicImage::new_rgb8(8, 2).save(&path).unwrap();

    let image = FrameLoader.load_blocking(&path).unwrap();
    assert_eq!(image.dimensions(), (8, 2));

    fs::remove_file(&path).unwrap();
    assert!(matches!(
        FrameLoader.load_blocking(&path),
        Err(FrameCacheError::Io(_))
    ));
}
