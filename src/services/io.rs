//! Image loading and encoding
//!
//! Keeps file and stream handling out of the editing logic. Decode failures
//! surface as `InvalidImage` so callers can report them as user input errors.

use crate::error::{EditError, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Encoded output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless, keeps transparency
    #[default]
    Png,
    /// Lossy, transparency is dropped
    Jpeg,
    /// Lossless WebP (requires the `webp-support` feature)
    WebP,
    Tiff,
}

impl OutputFormat {
    /// Guess the format from a file extension
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    #[must_use]
    pub fn supports_transparency(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::WebP),
            "tif" | "tiff" => Ok(Self::Tiff),
            other => Err(EditError::invalid_config(format!(
                "unsupported output format '{other}'"
            ))),
        }
    }
}

/// Service for image input/output
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file, falling back to content sniffing when the
    /// extension is wrong
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Content is not a decodable image
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();
        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(image::ImageError::IoError(e)) => Err(EditError::Io(e)),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {e}. Attempting content-based detection.",
                    path_ref.display()
                );
                let data = std::fs::read(path_ref)?;
                Self::load_from_bytes(&data)
            },
        }
    }

    /// Decode an image held in memory
    ///
    /// # Errors
    /// - Bytes are not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            EditError::invalid_image(format!(
                "failed to decode {} bytes of image data: {e}",
                bytes.len()
            ))
        })
    }

    /// Read a whole stream and decode it
    ///
    /// # Errors
    /// - Stream read failure
    /// - Data is not a decodable image
    pub async fn load_from_reader<R: tokio::io::AsyncRead + Unpin>(
        mut reader: R,
    ) -> Result<DynamicImage> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
        Self::load_from_bytes(&buffer)
    }

    /// Encode an image; `quality` only applies to JPEG
    ///
    /// # Errors
    /// - Encoder failure, or WebP requested without WebP support
    pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        match format {
            OutputFormat::Png => image.write_to(&mut cursor, image::ImageFormat::Png)?,
            OutputFormat::Jpeg => {
                let rgb_image = image.to_rgb8();
                let mut jpeg_encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);
                jpeg_encoder.encode_image(&rgb_image)?;
            },
            #[cfg(feature = "webp-support")]
            OutputFormat::WebP => image.write_to(&mut cursor, image::ImageFormat::WebP)?,
            #[cfg(not(feature = "webp-support"))]
            OutputFormat::WebP => {
                return Err(EditError::invalid_config(
                    "WebP output requires the webp-support feature",
                ))
            },
            OutputFormat::Tiff => image.write_to(&mut cursor, image::ImageFormat::Tiff)?,
        }
        Ok(buffer)
    }

    /// Encode and write an image to a file, creating parent directories
    ///
    /// # Errors
    /// - Encoding or file system failures
    pub fn save_image<P: AsRef<Path>>(
        image: &DynamicImage,
        path: P,
        format: OutputFormat,
        quality: u8,
    ) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = Self::encode(image, format, quality)?;
        std::fs::write(path_ref, bytes)?;
        log::debug!("Saved {format:?} image to {}", path_ref.display());
        Ok(())
    }

    /// Encode an image and stream it to `writer`, returning the byte count
    ///
    /// # Errors
    /// - Encoding or write failures
    pub async fn save_to_writer<W: tokio::io::AsyncWrite + Unpin>(
        image: &DynamicImage,
        mut writer: W,
        format: OutputFormat,
        quality: u8,
    ) -> Result<u64> {
        use tokio::io::AsyncWriteExt;

        let bytes = Self::encode(image, format, quality)?;
        AsyncWriteExt::write_all(&mut writer, &bytes).await?;
        AsyncWriteExt::flush(&mut writer).await?;
        Ok(bytes.len() as u64)
    }
}
