//! Photo editing service
//!
//! `PhotoEditor` owns the open photos and the segmentation pipelines. Each
//! photo sits behind its own mutex, held for the whole of an operation, so
//! racing requests for one photo serialize while different photos proceed in
//! parallel. Pipelines are shared and locked only around inference; the lock
//! order is always photo first, then pipeline.
//!
//! Operations compute the new image from the locked state and commit only on
//! success, so a failed edit leaves the photo exactly as it was.

use crate::{
    adjust::{self, AspectRatio, CropRequest, Enhancement, LayoutSpec},
    assets::{AssetLoader, AssetSpec, AssetStore, FsAssetStore, ReplacementAsset},
    config::EditorConfig,
    error::{EditError, Result},
    face::FaceDetector,
    models::ModelSpec,
    processor::{BackendFactory, DefaultBackendFactory, SegmentationPipeline},
    services::ImageIOService,
    session::{EditKind, PhotoState},
    types::EditResult,
};
use image::DynamicImage;
use imageproc::contrast::equalize_histogram;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{info, instrument, warn};

/// Where a garment comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GarmentSource {
    /// Named style from the catalogue, unknown names fall back to the default style
    Style(String),
    /// Explicit asset
    Asset(AssetSpec),
}

/// Outcome of a segmentation-guided edit as seen by callers
#[derive(Debug, Clone)]
pub struct EditSummary {
    /// `false` when nothing was found to replace and the photo is unchanged
    pub applied: bool,
    pub result: EditResult,
}

/// Multi-photo editing service
pub struct PhotoEditor {
    config: EditorConfig,
    photos: RwLock<HashMap<String, Arc<Mutex<PhotoState>>>>,
    background: Option<Mutex<SegmentationPipeline>>,
    garment: Option<Mutex<SegmentationPipeline>>,
    face_detector: Option<Arc<dyn FaceDetector>>,
    assets: AssetLoader,
}

impl std::fmt::Debug for PhotoEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoEditor")
            .field("photos", &self.photo_count())
            .field("background", &self.background.is_some())
            .field("garment", &self.garment.is_some())
            .field("face_detector", &self.face_detector.is_some())
            .finish_non_exhaustive()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| EditError::internal(format!("{what} lock poisoned")))
}

impl PhotoEditor {
    /// Build an editor from configuration: file asset store at `asset_dir`,
    /// pipelines for every configured model
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Requested backend not compiled in
    pub fn from_config(config: EditorConfig) -> Result<Self> {
        Self::from_config_with_factory(config, &DefaultBackendFactory)
    }

    /// As [`from_config`](Self::from_config) with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend creation fails
    pub fn from_config_with_factory(
        config: EditorConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;
        let build = |path: &Option<std::path::PathBuf>, pipeline_config| {
            path.as_ref()
                .map(|path| {
                    let model = ModelSpec::new(path.clone(), config.backend);
                    SegmentationPipeline::from_model(pipeline_config, &model, factory)
                })
                .transpose()
        };
        let background = build(&config.background_model, config.background.clone())?;
        let garment = build(&config.garment_model, config.garment.clone())?;
        let store: Arc<dyn AssetStore> = Arc::new(FsAssetStore::new(config.asset_dir.clone()));
        Ok(Self::new(config, background, garment, store))
    }

    /// Assemble an editor from prepared parts
    #[must_use]
    pub fn new(
        config: EditorConfig,
        background: Option<SegmentationPipeline>,
        garment: Option<SegmentationPipeline>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            config,
            photos: RwLock::new(HashMap::new()),
            background: background.map(Mutex::new),
            garment: garment.map(Mutex::new),
            face_detector: None,
            assets: AssetLoader::new(store),
        }
    }

    /// Enable [`center_face`](Self::center_face) with `detector`
    #[must_use]
    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    #[must_use]
    pub fn photo_count(&self) -> usize {
        self.photos.read().map(|photos| photos.len()).unwrap_or(0)
    }

    /// Register an image and return its photo id
    ///
    /// # Errors
    /// - Image has a zero dimension
    /// - Registry lock poisoned
    pub fn open(&self, image: DynamicImage) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.open_with_id(id.clone(), image)?;
        Ok(id)
    }

    /// Register an image under a caller-chosen id, replacing any photo with that id
    ///
    /// # Errors
    /// - Image has a zero dimension
    /// - Registry lock poisoned
    pub fn open_with_id<S: Into<String>>(&self, id: S, image: DynamicImage) -> Result<()> {
        let id = id.into();
        if image.width() == 0 || image.height() == 0 {
            return Err(EditError::invalid_image(format!(
                "cannot open a {}x{} image",
                image.width(),
                image.height()
            )));
        }
        info!(photo = %id, width = image.width(), height = image.height(), "Opened photo");
        self.photos
            .write()
            .map_err(|_| EditError::internal("photo registry lock poisoned"))?
            .insert(id, Arc::new(Mutex::new(PhotoState::new(image))));
        Ok(())
    }

    /// Decode and register encoded image bytes
    ///
    /// # Errors
    /// - Bytes are not an image
    pub fn open_bytes(&self, bytes: &[u8]) -> Result<String> {
        self.open(ImageIOService::load_from_bytes(bytes)?)
    }

    /// Read, decode and register an image stream
    ///
    /// # Errors
    /// - Stream or decode failure
    pub async fn open_reader<R: tokio::io::AsyncRead + Unpin>(&self, reader: R) -> Result<String> {
        let image = ImageIOService::load_from_reader(reader).await?;
        self.open(image)
    }

    /// Forget a photo; returns whether it was open
    ///
    /// # Errors
    /// - Registry lock poisoned
    pub fn close(&self, id: &str) -> Result<bool> {
        Ok(self
            .photos
            .write()
            .map_err(|_| EditError::internal("photo registry lock poisoned"))?
            .remove(id)
            .is_some())
    }

    fn photo(&self, id: &str) -> Result<Arc<Mutex<PhotoState>>> {
        self.photos
            .read()
            .map_err(|_| EditError::internal("photo registry lock poisoned"))?
            .get(id)
            .cloned()
            .ok_or_else(|| EditError::UnknownPhoto(id.to_string()))
    }

    /// Run `operation` with the photo locked
    fn with_photo<T, F>(&self, id: &str, operation: F) -> Result<T>
    where
        F: FnOnce(&mut PhotoState) -> Result<T>,
    {
        let photo = self.photo(id)?;
        let mut state = lock(&photo, "photo")?;
        operation(&mut state)
    }

    /// Copy of the photo's current image
    ///
    /// # Errors
    /// - Unknown photo id
    pub fn current(&self, id: &str) -> Result<DynamicImage> {
        self.with_photo(id, |state| Ok(state.current().clone()))
    }

    /// Copy of the photo as opened
    ///
    /// # Errors
    /// - Unknown photo id
    pub fn original(&self, id: &str) -> Result<DynamicImage> {
        self.with_photo(id, |state| Ok(state.original().clone()))
    }

    /// `(undo, redo)` depths
    ///
    /// # Errors
    /// - Unknown photo id
    pub fn history_depth(&self, id: &str) -> Result<(usize, usize)> {
        self.with_photo(id, |state| Ok((state.undo_depth(), state.redo_depth())))
    }

    fn pipeline<'a>(
        slot: &'a Option<Mutex<SegmentationPipeline>>,
        name: &str,
    ) -> Result<MutexGuard<'a, SegmentationPipeline>> {
        let pipeline = slot.as_ref().ok_or_else(|| {
            EditError::inference_unavailable(format!("no {name} segmentation model configured"))
        })?;
        lock(pipeline, name)
    }

    fn commit_edit(state: &mut PhotoState, result: EditResult, kind: EditKind) -> EditSummary {
        let applied = result.is_replaced();
        if applied {
            state.commit(result.image().clone(), kind);
        } else {
            warn!(?kind, "No region found, photo left unchanged");
        }
        EditSummary { applied, result }
    }

    /// Replace the background behind the subject
    ///
    /// Repeated replacements re-composite from the subject as it was before
    /// the first one.
    ///
    /// # Errors
    /// - Unknown photo, unusable asset, or segmentation failure
    #[instrument(skip(self), fields(asset = %asset))]
    pub fn replace_background(&self, id: &str, asset: &AssetSpec) -> Result<EditSummary> {
        let asset = self.assets.load(asset)?;
        self.with_photo(id, |state| {
            let source = state.background_source().clone();
            let result = Self::pipeline(&self.background, "background")?
                .replace_background(&source, &asset)?;
            Ok(Self::commit_edit(state, result, EditKind::ReplaceBackground))
        })
    }

    /// Make everything except the subject transparent
    ///
    /// # Errors
    /// - Unknown photo or segmentation failure
    #[instrument(skip(self))]
    pub fn remove_background(&self, id: &str) -> Result<EditSummary> {
        self.with_photo(id, |state| {
            let result = Self::pipeline(&self.background, "background")?
                .remove_background(state.current())?;
            Ok(Self::commit_edit(state, result, EditKind::RemoveBackground))
        })
    }

    fn garment_asset(&self, source: &GarmentSource) -> Result<ReplacementAsset> {
        match source {
            GarmentSource::Asset(spec) => self.assets.load(spec),
            GarmentSource::Style(style) => {
                let id = self.config.garment_asset_for(style).ok_or_else(|| {
                    EditError::invalid_config(format!("no garment asset for style '{style}'"))
                })?;
                self.assets.load_stored(id)
            },
        }
    }

    /// Paint a garment over the detected clothing region
    ///
    /// # Errors
    /// - Unknown photo, unusable asset, or segmentation failure
    #[instrument(skip(self))]
    pub fn replace_garment(&self, id: &str, source: &GarmentSource) -> Result<EditSummary> {
        let asset = self.garment_asset(source)?;
        self.with_photo(id, |state| {
            let result = Self::pipeline(&self.garment, "garment")?
                .replace_region(state.current(), &asset)?;
            Ok(Self::commit_edit(state, result, EditKind::ReplaceGarment))
        })
    }

    /// # Errors
    /// - Unknown photo or an empty crop
    pub fn crop(&self, id: &str, request: CropRequest) -> Result<()> {
        self.with_photo(id, |state| {
            let cropped = adjust::crop(state.current(), request)?;
            state.commit(cropped, EditKind::Crop);
            Ok(())
        })
    }

    /// # Errors
    /// - Unknown photo or invalid size
    pub fn resize(&self, id: &str, width: u32, height: u32, aspect: AspectRatio) -> Result<()> {
        self.with_photo(id, |state| {
            let resized = adjust::resize(state.current(), width, height, aspect)?;
            state.commit(resized, EditKind::Resize);
            Ok(())
        })
    }

    /// Set brightness and contrast relative to the image before this run of enhancements
    ///
    /// # Errors
    /// - Unknown photo or values out of range
    pub fn enhance(&self, id: &str, enhancement: Enhancement) -> Result<()> {
        self.with_photo(id, |state| {
            let enhanced = adjust::enhance(state.enhancement_base(), enhancement)?;
            state.commit(enhanced, EditKind::Enhance);
            Ok(())
        })
    }

    /// Tile the photo onto a print sheet; re-layout starts from the untiled photo
    ///
    /// # Errors
    /// - Unknown photo or invalid layout
    pub fn layout(&self, id: &str, spec: &LayoutSpec) -> Result<()> {
        self.with_photo(id, |state| {
            let sheet = adjust::layout(state.layout_base(), spec)?;
            state.commit(sheet, EditKind::Layout);
            Ok(())
        })
    }

    /// Shift the photo sideways so the detected faces sit on the centre line
    ///
    /// A photo with no detectable face is kept in place on a white canvas.
    ///
    /// # Errors
    /// - Unknown photo or no face detector configured
    #[instrument(skip(self))]
    pub fn center_face(&self, id: &str) -> Result<()> {
        let detector = self
            .face_detector
            .as_ref()
            .ok_or_else(|| EditError::inference_unavailable("no face detector configured"))?;
        self.with_photo(id, |state| {
            let gray = equalize_histogram(&state.current().to_luma8());
            let faces = detector.detect(gray.as_raw(), gray.width(), gray.height());
            info!(faces = faces.len(), "Detected faces");
            let centred = adjust::center_face(state.current(), &faces);
            state.commit(centred, EditKind::CenterFace);
            Ok(())
        })
    }

    /// # Errors
    /// - Unknown photo or nothing to undo
    pub fn undo(&self, id: &str) -> Result<()> {
        self.with_photo(id, |state| state.undo().map(|_| ()))
    }

    /// # Errors
    /// - Unknown photo or nothing to redo
    pub fn redo(&self, id: &str) -> Result<()> {
        self.with_photo(id, |state| state.redo().map(|_| ()))
    }

    /// Return to the photo as opened, keeping history
    ///
    /// # Errors
    /// - Unknown photo
    pub fn reset(&self, id: &str) -> Result<()> {
        self.with_photo(id, |state| {
            state.reset();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetStore;
    use crate::backends::test_utils::MockBackend;
    use crate::config::PipelineConfig;
    use crate::face::FaceBounds;
    use image::{Rgb, RgbImage};

    /// Reports fixed boxes and remembers the frame size it was shown
    struct FixedFaces {
        faces: Vec<FaceBounds>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl FixedFaces {
        fn new(faces: Vec<FaceBounds>) -> Arc<Self> {
            Arc::new(Self {
                faces,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl FaceDetector for FixedFaces {
        fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds> {
            assert_eq!(gray.len(), (width * height) as usize);
            self.seen.lock().unwrap().push((width, height));
            self.faces.clone()
        }
    }

    /// Grey photo with a dark 10px column at `x`
    fn marked_photo(x: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(60, 40, |px, _| {
            if (x..x + 10).contains(&px) {
                Rgb([10, 10, 10])
            } else {
                Rgb([90, 90, 90])
            }
        }))
    }

    fn editor() -> PhotoEditor {
        let background =
            SegmentationPipeline::new(PipelineConfig::saliency(), Box::new(MockBackend::new()))
                .unwrap();
        PhotoEditor::new(
            EditorConfig::default(),
            Some(background),
            None,
            Arc::new(MemoryAssetStore::new()),
        )
    }

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(60, 60, Rgb([90, 90, 90])))
    }

    #[test]
    fn test_open_and_close() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        assert_eq!(editor.photo_count(), 1);
        assert_eq!(editor.current(&id).unwrap(), photo());
        assert!(editor.close(&id).unwrap());
        assert!(matches!(
            editor.current(&id),
            Err(EditError::UnknownPhoto(_))
        ));
    }

    #[test]
    fn test_background_replacement_is_undoable() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        let summary = editor
            .replace_background(&id, &AssetSpec::SolidColor(Rgb([0, 0, 255])))
            .unwrap();
        assert!(summary.applied);
        assert_eq!(editor.history_depth(&id).unwrap(), (1, 0));

        editor.undo(&id).unwrap();
        assert_eq!(editor.current(&id).unwrap(), photo());
        editor.redo(&id).unwrap();
        assert_eq!(
            editor.current(&id).unwrap().to_rgb8().get_pixel(0, 0),
            &Rgb([0, 0, 255])
        );
    }

    #[test]
    fn test_missing_asset_leaves_state_intact() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        let result = editor.replace_background(&id, &AssetSpec::Stored("nope.png".into()));
        assert!(matches!(result, Err(EditError::AssetNotFound(_))));
        assert_eq!(editor.history_depth(&id).unwrap(), (0, 0));
    }

    #[test]
    fn test_garment_without_model_is_unavailable() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        let result = editor.replace_garment(
            &id,
            &GarmentSource::Asset(AssetSpec::SolidColor(Rgb([1, 1, 1]))),
        );
        assert!(matches!(result, Err(EditError::InferenceUnavailable(_))));
        assert_eq!(editor.current(&id).unwrap(), photo());
    }

    #[test]
    fn test_enhance_is_absolute() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        editor.enhance(&id, Enhancement::new(-50, 0).unwrap()).unwrap();
        editor.enhance(&id, Enhancement::new(-50, 0).unwrap()).unwrap();
        // second call re-applies to the unenhanced image
        assert_eq!(editor.current(&id).unwrap().to_rgb8().get_pixel(0, 0)[0], 45);
    }

    #[test]
    fn test_open_rejects_empty_image() {
        let editor = editor();
        let result = editor.open(DynamicImage::ImageRgb8(RgbImage::new(0, 0)));
        assert!(matches!(result, Err(EditError::InvalidImage(_))));
        let result = editor.open(DynamicImage::ImageRgb8(RgbImage::new(12, 0)));
        assert!(matches!(result, Err(EditError::InvalidImage(_))));
        assert_eq!(editor.photo_count(), 0);
    }

    #[test]
    fn test_center_face_moves_off_centre_face() {
        // face over the dark column at 40..50, centre 45 -> 30
        let detector = FixedFaces::new(vec![FaceBounds::new(40.0, 5.0, 10.0, 12.0)]);
        let editor = editor().with_face_detector(detector.clone());
        let id = editor.open(marked_photo(40)).unwrap();

        editor.center_face(&id).unwrap();

        let centred = editor.current(&id).unwrap().to_rgb8();
        assert_eq!(centred.dimensions(), (60, 40));
        assert_eq!(centred.get_pixel(25, 20), &Rgb([10, 10, 10]));
        assert_eq!(centred.get_pixel(34, 20), &Rgb([10, 10, 10]));
        assert_eq!(centred.get_pixel(40, 20), &Rgb([90, 90, 90]));
        assert_eq!(centred.get_pixel(59, 0), &Rgb([255, 255, 255]));
        assert_eq!(centred.get_pixel(45, 39), &Rgb([255, 255, 255]));
        assert_eq!(*detector.seen.lock().unwrap(), vec![(60, 40)]);

        assert_eq!(editor.history_depth(&id).unwrap(), (1, 0));
        editor.undo(&id).unwrap();
        assert_eq!(editor.current(&id).unwrap(), marked_photo(40));
    }

    #[test]
    fn test_center_face_uses_weighted_centre_of_faces() {
        // (10 * 100 + 40 * 400) / 500 = 34
        let detector = FixedFaces::new(vec![
            FaceBounds::new(5.0, 0.0, 10.0, 10.0),
            FaceBounds::new(30.0, 0.0, 20.0, 20.0),
        ]);
        let editor = editor().with_face_detector(detector);
        let id = editor.open(marked_photo(30)).unwrap();

        editor.center_face(&id).unwrap();

        let centred = editor.current(&id).unwrap().to_rgb8();
        assert_eq!(centred.get_pixel(26, 0), &Rgb([10, 10, 10]));
        assert_eq!(centred.get_pixel(35, 0), &Rgb([10, 10, 10]));
        assert_eq!(centred.get_pixel(36, 0), &Rgb([90, 90, 90]));
        assert_eq!(centred.get_pixel(56, 0), &Rgb([255, 255, 255]));
        assert_eq!(centred.get_pixel(55, 0), &Rgb([90, 90, 90]));
    }

    #[test]
    fn test_center_face_without_faces_keeps_image() {
        let editor = editor().with_face_detector(FixedFaces::new(Vec::new()));
        let id = editor.open(marked_photo(40)).unwrap();

        editor.center_face(&id).unwrap();

        assert_eq!(editor.current(&id).unwrap(), marked_photo(40));
        assert_eq!(editor.history_depth(&id).unwrap(), (1, 0));
    }

    #[test]
    fn test_center_face_needs_detector() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        assert!(matches!(
            editor.center_face(&id),
            Err(EditError::InferenceUnavailable(_))
        ));
        assert_eq!(editor.history_depth(&id).unwrap(), (0, 0));
    }

    #[test]
    fn test_crop_failure_keeps_history() {
        let editor = editor();
        let id = editor.open(photo()).unwrap();
        assert!(editor.crop(&id, CropRequest::new(0, 0, 0, 0)).is_err());
        assert_eq!(editor.history_depth(&id).unwrap(), (0, 0));
        editor.crop(&id, CropRequest::new(10, 10, 20, 30)).unwrap();
        assert_eq!(editor.current(&id).unwrap().width(), 20);
        editor.reset(&id).unwrap();
        assert_eq!(editor.current(&id).unwrap().width(), 60);
    }
}
