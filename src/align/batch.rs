//! Aligning every core of a TMA grid in one pass.

use web_time::Instant;

use super::pipeline::{AlignWarning, AlignmentInput, align_core, apply_outcome};
use crate::cancel::CancellationToken;
use crate::config::AlignConfig;
use crate::data::ImageServer;
use crate::error::AlignError;
use crate::model::{ObjectHierarchy, ObjectId, ObjectKind};

/// What happened to one core.
#[derive(Debug)]
pub enum CoreStatus {
    Aligned {
        updated: usize,
        failed_rois: usize,
        correlation: f64,
        warnings: Vec<AlignWarning>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: AlignError,
    },
}

#[derive(Debug)]
pub struct CoreReport {
    pub core: ObjectId,
    pub name: String,
    pub status: CoreStatus,
}

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub cores: Vec<CoreReport>,
    /// True when the run stopped early on request
    pub cancelled: bool,
}

impl BatchReport {
    pub fn aligned_count(&self) -> usize {
        self.cores
            .iter()
            .filter(|c| matches!(c.status, CoreStatus::Aligned { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.cores
            .iter()
            .filter(|c| matches!(c.status, CoreStatus::Skipped { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.cores
            .iter()
            .filter(|c| matches!(c.status, CoreStatus::Failed { .. }))
            .count()
    }

    /// Total annotations whose geometry was replaced.
    pub fn updated_annotations(&self) -> usize {
        self.cores
            .iter()
            .map(|c| match c.status {
                CoreStatus::Aligned { updated, .. } => updated,
                _ => 0,
            })
            .sum()
    }
}

/// Align every TMA core in the hierarchy.
///
/// A hierarchy without cores fails with [`AlignError::NoTmaGrid`] before
/// anything is read.
pub fn align_tma_grid(
    server: &dyn ImageServer,
    hierarchy: &mut ObjectHierarchy,
    config: &AlignConfig,
    cancel: &CancellationToken,
) -> Result<BatchReport, AlignError> {
    let cores = hierarchy.tma_cores();
    if cores.is_empty() {
        return Err(AlignError::NoTmaGrid);
    }
    align_cores(server, hierarchy, &cores, config, cancel)
}

/// Align the given cores one after another, writing back each success.
///
/// A core that fails is recorded and the batch moves on. Cancellation stops
/// the batch; cores finished before that keep their new geometry.
pub fn align_cores(
    server: &dyn ImageServer,
    hierarchy: &mut ObjectHierarchy,
    cores: &[ObjectId],
    config: &AlignConfig,
    cancel: &CancellationToken,
) -> Result<BatchReport, AlignError> {
    config.validate()?;
    let start = Instant::now();
    let mut report = BatchReport::default();

    for &core in cores {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let (name, missing) = match hierarchy.get(core).map(|o| &o.kind) {
            Some(ObjectKind::TmaCore { name, missing }) => (name.clone(), *missing),
            _ => (String::new(), false),
        };
        if missing {
            log::debug!("Skipping missing core {}", name);
            report.cores.push(CoreReport {
                core,
                name,
                status: CoreStatus::Skipped {
                    reason: "core is marked missing".to_string(),
                },
            });
            continue;
        }

        let result = AlignmentInput::for_core(hierarchy, core)
            .and_then(|input| align_core(server, &input, config, cancel));
        let status = match result {
            Ok(outcome) => match apply_outcome(hierarchy, &outcome) {
                Ok(updated) => CoreStatus::Aligned {
                    updated,
                    failed_rois: outcome.failures.len(),
                    correlation: outcome.registration.correlation,
                    warnings: outcome.warnings,
                },
                Err(error) => CoreStatus::Failed { error },
            },
            Err(error) if error.is_cancelled() => {
                report.cancelled = true;
                break;
            }
            Err(AlignError::NoEligibleAnnotations { .. }) => CoreStatus::Skipped {
                reason: "no annotations".to_string(),
            },
            Err(error) => {
                log::warn!("Core {} ({}) failed: {}", core, name, error);
                CoreStatus::Failed { error }
            }
        };
        report.cores.push(CoreReport { core, name, status });
    }

    if report.cancelled {
        log::info!("Batch cancelled after {} cores", report.cores.len());
    }
    log::info!(
        "Batch finished in {:?}: {} aligned, {} skipped, {} failed, {} annotations updated",
        start.elapsed(),
        report.aligned_count(),
        report.skipped_count(),
        report.failed_count(),
        report.updated_annotations()
    );
    Ok(report)
}
