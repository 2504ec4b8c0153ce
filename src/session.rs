//! Per-photo editing state and history
//!
//! Each photo carries its own undo and redo stacks plus the base images some
//! edits are re-applied to. A base survives only a consecutive run of its own
//! edit kind: any other edit, and any undo or redo, discards it.

use crate::error::{EditError, Result};
use image::DynamicImage;

/// Kind of change committed to a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    ReplaceBackground,
    RemoveBackground,
    ReplaceGarment,
    Crop,
    Resize,
    Enhance,
    Layout,
    CenterFace,
    Reset,
}

impl EditKind {
    /// Whether the edit changes the pixel grid
    #[must_use]
    pub fn is_geometric(&self) -> bool {
        matches!(self, Self::Crop | Self::Resize | Self::Layout | Self::CenterFace)
    }
}

/// State of one open photo
#[derive(Debug, Clone)]
pub struct PhotoState {
    original: DynamicImage,
    current: DynamicImage,
    undo_stack: Vec<DynamicImage>,
    redo_stack: Vec<DynamicImage>,
    /// Subject before the first of a run of background replacements
    background_source: Option<DynamicImage>,
    /// Image before the first of a run of enhancements
    enhancement_base: Option<DynamicImage>,
    /// Image before the first of a run of layouts
    layout_base: Option<DynamicImage>,
}

impl PhotoState {
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            current: image.clone(),
            original: image,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            background_source: None,
            enhancement_base: None,
            layout_base: None,
        }
    }

    #[must_use]
    pub fn original(&self) -> &DynamicImage {
        &self.original
    }

    #[must_use]
    pub fn current(&self) -> &DynamicImage {
        &self.current
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Image a background replacement should segment and paint over
    #[must_use]
    pub fn background_source(&self) -> &DynamicImage {
        self.background_source.as_ref().unwrap_or(&self.current)
    }

    /// Image brightness and contrast are applied to
    #[must_use]
    pub fn enhancement_base(&self) -> &DynamicImage {
        self.enhancement_base.as_ref().unwrap_or(&self.current)
    }

    /// Image a layout tiles
    #[must_use]
    pub fn layout_base(&self) -> &DynamicImage {
        self.layout_base.as_ref().unwrap_or(&self.current)
    }

    /// Make `image` current, pushing the previous image onto the undo stack
    pub fn commit(&mut self, image: DynamicImage, kind: EditKind) {
        let previous = std::mem::replace(&mut self.current, image);

        let keep = |slot: &mut Option<DynamicImage>, own: bool| {
            if own {
                slot.get_or_insert_with(|| previous.clone());
            } else {
                *slot = None;
            }
        };
        keep(
            &mut self.background_source,
            kind == EditKind::ReplaceBackground,
        );
        keep(&mut self.enhancement_base, kind == EditKind::Enhance);
        keep(&mut self.layout_base, kind == EditKind::Layout);

        self.undo_stack.push(previous);
        self.redo_stack.clear();
        log::debug!(
            "Committed {kind:?}: undo depth {}, geometric {}",
            self.undo_stack.len(),
            kind.is_geometric()
        );
    }

    /// Step back one edit
    ///
    /// # Errors
    /// - Undo stack is empty
    pub fn undo(&mut self) -> Result<&DynamicImage> {
        let previous = self.undo_stack.pop().ok_or(EditError::NothingToUndo)?;
        let current = std::mem::replace(&mut self.current, previous);
        self.redo_stack.push(current);
        self.clear_bases();
        Ok(&self.current)
    }

    /// Re-apply the last undone edit
    ///
    /// # Errors
    /// - Redo stack is empty
    pub fn redo(&mut self) -> Result<&DynamicImage> {
        let next = self.redo_stack.pop().ok_or(EditError::NothingToRedo)?;
        let current = std::mem::replace(&mut self.current, next);
        self.undo_stack.push(current);
        self.clear_bases();
        Ok(&self.current)
    }

    /// Return to the photo as opened; undoable
    pub fn reset(&mut self) {
        self.commit(self.original.clone(), EditKind::Reset);
    }

    fn clear_bases(&mut self) {
        self.background_source = None;
        self.enhancement_base = None;
        self.layout_base = None;
    }
}
