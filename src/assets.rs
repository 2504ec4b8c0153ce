//! Replacement assets: specs, storage and decoding
//!
//! An asset is either a flat colour or an image held by an [`AssetStore`]
//! under an opaque identifier. Images that carry transparency are split into
//! an opaque colour image plus a binary alpha mask, so the compositor can
//! keep transparent parts of an asset from overwriting the photo.

use crate::error::{EditError, Result};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Prefix marking a stored-image reference in textual asset specs
const STORED_PREFIX: &str = "image:";

/// What to paint into the selected region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSpec {
    SolidColor(Rgb<u8>),
    /// Identifier resolved through an [`AssetStore`]
    Stored(String),
}

impl AssetSpec {
    /// Parse `#RRGGBB`, `RRGGBB`, `#RGB` or `image:<id>`
    ///
    /// # Errors
    /// - Colour is not valid hexadecimal of length 3 or 6
    /// - `image:` prefix with an empty identifier
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Some(id) = spec.strip_prefix(STORED_PREFIX) {
            let id = id.trim();
            if id.is_empty() {
                return Err(EditError::invalid_config("asset reference has no identifier"));
            }
            return Ok(Self::Stored(id.to_string()));
        }
        parse_hex_color(spec).map(Self::SolidColor)
    }
}

impl FromStr for AssetSpec {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AssetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SolidColor(Rgb([r, g, b])) => write!(f, "#{r:02X}{g:02X}{b:02X}"),
            Self::Stored(id) => write!(f, "{STORED_PREFIX}{id}"),
        }
    }
}

/// Parse a `#RRGGBB`, `RRGGBB` or `#RGB` colour
///
/// # Errors
/// - Input is not 3 or 6 hexadecimal digits (after an optional `#`)
pub fn parse_hex_color(text: &str) -> Result<Rgb<u8>> {
    let hex = text.trim().trim_start_matches('#');
    let invalid = || EditError::invalid_config(format!("invalid colour '{}'", text.trim()));

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        6 => Ok(Rgb([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        ])),
        3 => {
            let expand = |i: usize| channel(&hex[i..=i]).map(|v| v * 17);
            Ok(Rgb([expand(0)?, expand(1)?, expand(2)?]))
        },
        _ => Err(invalid()),
    }
}

/// Resolves asset identifiers to encoded image bytes
pub trait AssetStore: Send + Sync {
    /// # Errors
    /// - `AssetNotFound` when no asset matches the identifier
    /// - `Io` for storage failures
    fn fetch(&self, id: &str) -> Result<Vec<u8>>;
}

/// Directory-backed asset store
///
/// Identifiers match a file name exactly, or failing that the first file (in
/// sorted order) whose name starts with the identifier, so an upload stored
/// as `<uuid>.png` is found by its UUID alone.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate the file for an identifier
    ///
    /// # Errors
    /// - Identifier is empty or tries to leave the store directory
    /// - No file matches
    pub fn resolve(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;

        let exact = self.root.join(id);
        if exact.is_file() {
            return Ok(exact);
        }

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EditError::asset_not_found(id));
            },
            Err(e) => return Err(e.into()),
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(id))
            })
            .collect();
        candidates.sort();

        candidates
            .into_iter()
            .next()
            .ok_or_else(|| EditError::asset_not_found(id))
    }

    /// Store an uploaded image and return its new identifier
    ///
    /// # Errors
    /// - Extension is not a short alphanumeric suffix
    /// - Bytes do not decode as an image (`AssetDecode`)
    /// - Directory cannot be created or the file cannot be written
    pub fn store(&self, bytes: &[u8], extension: &str) -> Result<String> {
        let extension = extension.trim().trim_start_matches('.').to_lowercase();
        if extension.is_empty()
            || extension.len() > 5
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(EditError::invalid_config(format!(
                "invalid asset extension '{}'",
                extension
            )));
        }

        image::load_from_memory(bytes)
            .map_err(|e| EditError::asset_decode(format!("uploaded asset: {}", e)))?;

        std::fs::create_dir_all(&self.root)?;
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.root.join(format!("{id}.{extension}"));
        std::fs::write(&path, bytes)?;
        log::info!("Stored asset {} ({} bytes)", path.display(), bytes.len());
        Ok(id)
    }
}

impl AssetStore for FsAssetStore {
    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(id)?;
        log::debug!("Fetching asset '{}' from {}", id, path.display());
        Ok(std::fs::read(path)?)
    }
}

fn validate_id(id: &str) -> Result<()> {
    let id_ok = !id.is_empty()
        && !id.contains('/')
        && !id.contains('\\')
        && !id.contains("..")
        && !id.contains('\0');
    if id_ok {
        Ok(())
    } else {
        Err(EditError::invalid_config(format!(
            "invalid asset identifier '{}'",
            id
        )))
    }
}

/// In-memory asset store
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    assets: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryAssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&self, id: S, bytes: Vec<u8>) {
        if let Ok(mut assets) = self.assets.write() {
            assets.insert(id.into(), bytes);
        }
    }

    /// Encode an image as PNG and store it
    ///
    /// # Errors
    /// - PNG encoding fails
    pub fn insert_image<S: Into<String>>(&self, id: S, image: &DynamicImage) -> Result<()> {
        let mut bytes = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        self.insert(id, bytes);
        Ok(())
    }
}

impl AssetStore for MemoryAssetStore {
    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let assets = self
            .assets
            .read()
            .map_err(|_| EditError::internal("asset store lock poisoned"))?;
        assets
            .get(id)
            .cloned()
            .ok_or_else(|| EditError::asset_not_found(id))
    }
}

/// Decoded asset ready for compositing
#[derive(Debug, Clone, PartialEq)]
pub enum ReplacementAsset {
    Solid(Rgb<u8>),
    Image {
        /// Opaque colour channels
        color: RgbImage,
        /// 255 where the source had any visible opacity, present only for sources with alpha
        alpha: Option<GrayImage>,
    },
}

impl ReplacementAsset {
    /// Split an image into colour and, if it carries transparency, a binary alpha mask
    #[must_use]
    pub fn from_image(image: &DynamicImage) -> Self {
        let alpha = image.color().has_alpha().then(|| {
            let rgba = image.to_rgba8();
            let mut mask = GrayImage::new(rgba.width(), rgba.height());
            for (x, y, p) in rgba.enumerate_pixels() {
                if p[3] > 0 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
            mask
        });

        Self::Image {
            color: image.to_rgb8(),
            alpha,
        }
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::Image { alpha: Some(_), .. })
    }

    /// Native dimensions; `None` for flat colours
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::Solid(_) => None,
            Self::Image { color, .. } => Some(color.dimensions()),
        }
    }
}

/// Resolves [`AssetSpec`]s into decoded [`ReplacementAsset`]s
#[derive(Clone)]
pub struct AssetLoader {
    store: Arc<dyn AssetStore>,
}

impl fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetLoader").finish_non_exhaustive()
    }
}

impl AssetLoader {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// - `AssetNotFound` when the store has no such asset
    /// - `AssetDecode` when the stored bytes are not a decodable image
    pub fn load(&self, spec: &AssetSpec) -> Result<ReplacementAsset> {
        match spec {
            AssetSpec::SolidColor(color) => Ok(ReplacementAsset::Solid(*color)),
            AssetSpec::Stored(id) => self.load_stored(id),
        }
    }

    /// # Errors
    /// - `AssetNotFound` or `AssetDecode`
    pub fn load_stored(&self, id: &str) -> Result<ReplacementAsset> {
        let bytes = self.store.fetch(id)?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| EditError::asset_decode(format!("'{}': {}", id, e)))?;
        log::debug!(
            "Loaded asset '{}' ({}x{}, alpha: {})",
            id,
            image.width(),
            image.height(),
            image.color().has_alpha()
        );
        Ok(ReplacementAsset::from_image(&image))
    }
}
