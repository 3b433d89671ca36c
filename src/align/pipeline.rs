//! Per-core alignment: region, mask, threshold, registration, reprojection.

use std::fmt;

use web_time::Instant;

use super::region::{extract_region, plan_region};
use super::reproject::{refine_from_matrix, reproject};
use crate::cancel::CancellationToken;
use crate::config::AlignConfig;
use crate::data::{ImageServer, RegionRequest};
use crate::error::AlignError;
use crate::geometry::AffineTransform;
use crate::model::{AnnotationHierarchy, ObjectHierarchy, ObjectId, ObjectKind, Roi};
use crate::raster::{
    binarize_to_count, count_foreground, forward_transform, rasterize_mask, to_gray8,
};
use crate::registration::{RegistrationError, find_transform_ecc};

/// Snapshot of one container and the annotations to align inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentInput {
    pub parent: ObjectId,
    pub parent_roi: Roi,
    pub annotations: Vec<(ObjectId, Roi)>,
}

impl AlignmentInput {
    /// Collect the container ROI and its childless annotations.
    pub fn from_hierarchy(
        hierarchy: &impl AnnotationHierarchy,
        parent: ObjectId,
    ) -> Result<Self, AlignError> {
        let parent_roi = hierarchy
            .roi_of(parent)
            .ok_or(AlignError::ObjectNotFound { id: parent })?;
        let annotations = hierarchy.leaf_annotations(parent);
        if annotations.is_empty() {
            return Err(AlignError::NoEligibleAnnotations { parent });
        }
        Ok(Self {
            parent,
            parent_roi,
            annotations,
        })
    }

    /// Like [`AlignmentInput::from_hierarchy`], but only for TMA cores.
    pub fn for_core(hierarchy: &ObjectHierarchy, core: ObjectId) -> Result<Self, AlignError> {
        let object = hierarchy
            .get(core)
            .ok_or(AlignError::ObjectNotFound { id: core })?;
        if !matches!(object.kind, ObjectKind::TmaCore { .. }) {
            return Err(AlignError::NotAContainer { id: core });
        }
        Self::from_hierarchy(hierarchy, core)
    }
}

/// Something worth surfacing about a run that still produced geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignWarning {
    /// The solver hit its iteration cap
    NotConverged { iterations: usize },
    /// Final correlation is below the configured minimum
    LowCorrelation { correlation: f64, minimum: f64 },
    /// The threshold left no foreground in the image
    DegenerateThreshold { threshold: Option<u8> },
}

impl fmt::Display for AlignWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConverged { iterations } => {
                write!(f, "registration did not converge in {} iterations", iterations)
            }
            Self::LowCorrelation {
                correlation,
                minimum,
            } => write!(
                f,
                "correlation {:.3} is below the minimum {:.3}",
                correlation, minimum
            ),
            Self::DegenerateThreshold { threshold } => match threshold {
                Some(t) => write!(f, "threshold {} selects no tissue", t),
                None => write!(f, "no threshold reaches the annotated area"),
            },
        }
    }
}

/// Registration details of a finished run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationSummary {
    /// Raw solver warp in working-resolution pixel indices
    pub warp: AffineTransform,
    /// The same correction in raster coordinates
    pub refine: AffineTransform,
    pub correlation: f64,
    pub iterations: usize,
    pub converged: bool,
    pub threshold: Option<u8>,
    /// Annotated pixels at working resolution
    pub mask_pixels: u64,
}

/// An annotation that could not be moved.
#[derive(Debug)]
pub struct RoiFailure {
    pub id: ObjectId,
    pub error: AlignError,
}

/// Result of aligning one container. Nothing has been written back yet.
#[derive(Debug)]
pub struct AlignmentOutcome {
    pub parent: ObjectId,
    pub request: RegionRequest,
    pub downsample: f64,
    pub updates: Vec<(ObjectId, Roi)>,
    pub failures: Vec<RoiFailure>,
    pub registration: RegistrationSummary,
    pub warnings: Vec<AlignWarning>,
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), AlignError> {
    if cancel.is_cancelled() {
        Err(AlignError::Cancelled)
    } else {
        Ok(())
    }
}

/// Align the annotations of `input` to the tissue in `server`.
///
/// The mask is rasterized before any pixels are requested, so an input that
/// covers nothing at the working resolution never touches the server.
pub fn align_core(
    server: &dyn ImageServer,
    input: &AlignmentInput,
    config: &AlignConfig,
    cancel: &CancellationToken,
) -> Result<AlignmentOutcome, AlignError> {
    let start = Instant::now();
    config.validate()?;
    if input.annotations.is_empty() {
        return Err(AlignError::NoEligibleAnnotations {
            parent: input.parent,
        });
    }
    check_cancelled(cancel)?;

    log::info!(
        "Aligning {} annotations in object {}",
        input.annotations.len(),
        input.parent
    );

    let request = plan_region(server, &input.parent_roi, config.target_pixel_size_microns)?;
    let forward = forward_transform(&request);
    let (width, height) = request.output_size();
    log::debug!(
        "Region {}x{} at ({}, {}), downsample {:.3}, raster {}x{}",
        request.width,
        request.height,
        request.x,
        request.y,
        request.downsample,
        width,
        height
    );

    let rois: Vec<Roi> = input.annotations.iter().map(|(_, roi)| roi.clone()).collect();
    let mask = rasterize_mask(&rois, &forward, width, height, config.ellipse_segments);
    let mask_pixels = count_foreground(&mask);
    if mask_pixels == 0 {
        return Err(AlignError::empty_region(format!(
            "annotations cover no pixels at downsample {:.3}",
            request.downsample
        )));
    }
    check_cancelled(cancel)?;

    let read_start = Instant::now();
    let region = extract_region(server, request)?;
    let mut target = to_gray8(&region.image);
    drop(region);
    log::debug!("Region read in {:?}", read_start.elapsed());

    let mut warnings = Vec::new();
    let threshold = binarize_to_count(&mut target, mask_pixels);
    if count_foreground(&target) == 0 {
        // Registration fails on an empty target, so report it before the solver runs
        log::warn!("Object {}: threshold {:?} left no tissue", input.parent, threshold);
        warnings.push(AlignWarning::DegenerateThreshold { threshold });
    }
    check_cancelled(cancel)?;

    let ecc_start = Instant::now();
    let ecc = find_transform_ecc(&mask, &target, &config.ecc(), cancel).map_err(|e| match e {
        RegistrationError::Cancelled { .. } => AlignError::Cancelled,
        other => AlignError::Registration(other),
    })?;
    log::debug!(
        "ECC finished in {:?}: rho {:.4}, {} iterations, rotation {:.4} rad, shift {:?}",
        ecc_start.elapsed(),
        ecc.correlation,
        ecc.iterations,
        ecc.transform.rotation(),
        ecc.transform.translation_part()
    );

    if !ecc.converged {
        warnings.push(AlignWarning::NotConverged {
            iterations: ecc.iterations,
        });
    }
    if ecc.correlation < config.min_correlation {
        warnings.push(AlignWarning::LowCorrelation {
            correlation: ecc.correlation,
            minimum: config.min_correlation,
        });
    }

    let refine = refine_from_matrix(ecc.transform.to_matrix());
    let mut updates = Vec::with_capacity(input.annotations.len());
    let mut failures = Vec::new();
    for (id, roi) in &input.annotations {
        match reproject(roi, &forward, &refine, config.ellipse_segments) {
            Ok(moved) => updates.push((*id, moved)),
            Err(error) => {
                log::warn!("Skipping annotation {}: {}", id, error);
                failures.push(RoiFailure { id: *id, error });
            }
        }
    }

    for warning in &warnings {
        log::warn!("Object {}: {}", input.parent, warning);
    }
    log::info!(
        "Aligned {} of {} annotations in object {} ({:?})",
        updates.len(),
        input.annotations.len(),
        input.parent,
        start.elapsed()
    );

    Ok(AlignmentOutcome {
        parent: input.parent,
        request,
        downsample: request.downsample,
        updates,
        failures,
        registration: RegistrationSummary {
            warp: ecc.transform,
            refine,
            correlation: ecc.correlation,
            iterations: ecc.iterations,
            converged: ecc.converged,
            threshold,
            mask_pixels,
        },
        warnings,
    })
}

/// Write the moved ROIs back and fire one change event for the container.
///
/// Every target id is checked before anything is replaced, so a stale
/// outcome leaves the hierarchy untouched. Returns the number of replaced
/// ROIs.
pub fn apply_outcome(
    hierarchy: &mut impl AnnotationHierarchy,
    outcome: &AlignmentOutcome,
) -> Result<usize, AlignError> {
    if let Some((id, _)) = outcome
        .updates
        .iter()
        .find(|(id, _)| hierarchy.roi_of(*id).is_none())
    {
        return Err(AlignError::ObjectNotFound { id: *id });
    }

    let mut changed = Vec::with_capacity(outcome.updates.len());
    for (id, roi) in &outcome.updates {
        hierarchy.replace_roi(*id, roi.clone())?;
        changed.push(*id);
    }
    if !changed.is_empty() {
        hierarchy.notify_changed(outcome.parent, &changed);
    }
    Ok(changed.len())
}
