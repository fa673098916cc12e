//! Image optimization.
//!
//! PNGs are re-encoded with maximum compression and adaptive filtering, JPEGs
//! at a fixed quality, SVGs lose comments and inter-tag whitespace. A
//! re-encoded raster only replaces the original when it is smaller. Other
//! formats (GIF included) pass through untouched.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};
use rayon::prelude::*;
use regex::Regex;
use std::sync::OnceLock;

use crate::pipeline::{Asset, Stage, StageContext};
use crate::task::StageError;

const STAGE: &str = "images";

/// Default JPEG re-encode quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// Losslessly (PNG, SVG) or lossily (JPEG) shrink images.
#[derive(Debug, Clone)]
pub struct OptimizeImages {
    jpeg_quality: u8,
}

impl Default for OptimizeImages {
    fn default() -> Self {
        Self { jpeg_quality: DEFAULT_JPEG_QUALITY }
    }
}

impl OptimizeImages {
    /// Create an optimizer with the given JPEG quality (1-100).
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality: jpeg_quality.clamp(1, 100) }
    }

    fn optimize(&self, asset: Asset) -> Result<Asset, StageError> {
        let ext = asset
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let optimized = match ext.as_str() {
            "png" => Some(encode_png(&asset.contents)),
            "jpg" | "jpeg" => Some(encode_jpeg(&asset.contents, self.jpeg_quality)),
            "svg" => Some(Ok(minify_svg(asset.text(STAGE)?).into_bytes())),
            _ => None,
        };

        match optimized {
            Some(Ok(bytes)) if bytes.len() < asset.contents.len() => {
                tracing::debug!(
                    file = %asset.path.display(),
                    before = asset.contents.len(),
                    after = bytes.len(),
                    "optimized image"
                );
                Ok(Asset { contents: bytes, ..asset })
            }
            Some(Err(e)) => Err(StageError::new(STAGE, e.to_string()).in_file(asset.origin())),
            _ => Ok(asset),
        }
    }
}

impl Stage for OptimizeImages {
    fn name(&self) -> &str {
        STAGE
    }

    fn apply(&self, assets: Vec<Asset>, _ctx: &mut StageContext) -> Result<Vec<Asset>, StageError> {
        assets.into_par_iter().map(|asset| self.optimize(asset)).collect()
    }
}

fn encode_png(data: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive).write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        img.color(),
    )?;
    Ok(buf)
}

fn encode_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image::load_from_memory(data)?.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf)
}

fn svg_comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"))
}

fn svg_gap_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s+<").expect("whitespace pattern is valid"))
}

/// Drop comments and whitespace between tags.
pub fn minify_svg(svg: &str) -> String {
    let without_comments = svg_comment_regex().replace_all(svg, "");
    svg_gap_regex().replace_all(without_comments.trim(), "><").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient(format: ImageOutputFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_minify_svg() {
        let svg = "<?xml version=\"1.0\"?>\n<!-- editor -->\n<svg>\n  <rect width=\"1\"/>\n</svg>\n";
        assert_eq!(minify_svg(svg), "<?xml version=\"1.0\"?><svg><rect width=\"1\"/></svg>");
    }

    #[test]
    fn test_png_never_grows_and_stays_decodable() {
        let original = gradient(ImageOutputFormat::Png);
        let mut ctx = StageContext::new("/nonexistent");
        let out = OptimizeImages::default()
            .apply(vec![Asset::new("a.png", original.clone())], &mut ctx)
            .unwrap();

        assert!(out[0].contents.len() <= original.len());
        let decoded = image::load_from_memory(&out[0].contents).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_jpeg_reencoded_at_lower_quality() {
        let original = gradient(ImageOutputFormat::Jpeg(100));
        let mut ctx = StageContext::new("/nonexistent");
        let out = OptimizeImages::new(50)
            .apply(vec![Asset::new("photo.JPG", original.clone())], &mut ctx)
            .unwrap();

        assert!(out[0].contents.len() < original.len());
        assert!(image::load_from_memory(&out[0].contents).is_ok());
    }

    #[test]
    fn test_corrupt_image_fails_with_file() {
        let mut ctx = StageContext::new("/nonexistent");
        let err = OptimizeImages::default()
            .apply(vec![Asset::new("broken.png", b"not a png".to_vec())], &mut ctx)
            .unwrap_err();
        assert_eq!(err.stage, STAGE);
        assert_eq!(err.file.unwrap().to_string_lossy(), "broken.png");
    }

    #[test]
    fn test_other_formats_pass_through() {
        let mut ctx = StageContext::new("/nonexistent");
        let out = OptimizeImages::default()
            .apply(vec![Asset::new("anim.gif", b"GIF89a...".to_vec())], &mut ctx)
            .unwrap();
        assert_eq!(out[0].contents, b"GIF89a...");
    }
}
