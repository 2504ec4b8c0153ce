//! Mask synthesis and refinement

pub mod refine;
pub mod synthesis;

pub use refine::MaskRefiner;
pub use synthesis::{argmax_labels, probability_map, sigmoid, MaskSynthesizer};
