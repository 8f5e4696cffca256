use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::debug;

use crate::error::LoadError;
use crate::media::{DecodedImage, LoadedContent, MediaReference, MediaType, VideoSource};

/// Produces displayable content for a reference.
///
/// Called on the blocking pool; implementations may do disk I/O freely.
pub trait MediaLoader: Send + Sync {
    fn load(
        &self,
        reference: &MediaReference,
        target_width: u32,
        target_height: u32,
    ) -> Result<LoadedContent, LoadError>;
}

/// Loads media from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMediaLoader;

impl MediaLoader for FsMediaLoader {
    fn load(
        &self,
        reference: &MediaReference,
        target_width: u32,
        target_height: u32,
    ) -> Result<LoadedContent, LoadError> {
        let path = reference.local_path();
        match reference.media_type() {
            MediaType::Image => {
                let img = decode_rgba8_apply_exif(&path)?;
                let img = fit_within(img, target_width, target_height);
                let (width, height) = img.dimensions();
                debug!(uri = %reference, width, height, "decoded image");
                Ok(LoadedContent::Image(DecodedImage {
                    width,
                    height,
                    pixels: img.into_raw(),
                }))
            }
            MediaType::Video => {
                let meta = fs::metadata(&path)?;
                if !meta.is_file() || meta.len() == 0 {
                    return Err(LoadError::Unsupported(format!(
                        "{} is not a readable video file",
                        path.display()
                    )));
                }
                // opening proves we may read it; decoding is the sink's job
                File::open(&path)?;
                Ok(LoadedContent::Video(VideoSource {
                    path,
                    size_bytes: meta.len(),
                }))
            }
        }
    }
}

// Decodes an image to RGBA8 and applies EXIF orientation if available.
fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage, LoadError> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let img = img.to_rgba8();

    let img = match read_orientation(path).unwrap_or(1) {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    };
    Ok(img)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = u16::try_from(field.value.get_uint(0)?).ok()?;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

/// Downscale to fit the target box, keeping aspect ratio. Never upscales; a
/// zero target dimension leaves the image as decoded.
fn fit_within(img: RgbaImage, target_width: u32, target_height: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    if target_width == 0 || target_height == 0 || (w <= target_width && h <= target_height) {
        return img;
    }
    let scale = f64::min(
        f64::from(target_width) / f64::from(w),
        f64::from(target_height) / f64::from(h),
    );
    let nw = ((f64::from(w) * scale).round() as u32).max(1);
    let nh = ((f64::from(h) * scale).round() as u32).max(1);
    imageops::resize(&img, nw, nh, FilterType::Triangle)
}
