//! Annotation alignment for TMA cores.
//!
//! For one core the pipeline is:
//!
//! 1. pick a downsample that reaches the working pixel size and read the
//!    core's bounding region ([`region`])
//! 2. rasterize the core's childless annotations into a binary mask
//! 3. reduce the region to 8-bit gray and binarize it so the dark pixels
//!    cover as much area as the mask
//! 4. register mask to image with Euclidean ECC
//! 5. move every annotation through `forward`, `refine` and `forward⁻¹`
//!    ([`reproject`])
//!
//! [`align_core`] produces an [`AlignmentOutcome`] without touching the
//! hierarchy. [`apply_outcome`] writes it back, and [`align_tma_grid`] does
//! both for every core of a slide.

mod batch;
mod pipeline;
pub mod region;
pub mod reproject;

pub use batch::{BatchReport, CoreReport, CoreStatus, align_cores, align_tma_grid};
pub use pipeline::{
    AlignWarning, AlignmentInput, AlignmentOutcome, RegistrationSummary, RoiFailure, align_core,
    apply_outcome,
};
pub use region::{ExtractedRegion, choose_downsample, extract_region, plan_region};
pub use reproject::{refine_from_matrix, reproject};
