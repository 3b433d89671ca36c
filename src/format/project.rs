//! Project file structure and versioning.
//!
//! A project references one slide image, optionally overrides its pixel
//! calibration, and stores every object (TMA cores and annotations) with its
//! parent link and ROI.
//!
//! # Versioning
//!
//! The format uses semantic versioning (MAJOR.MINOR.PATCH):
//!
//! - **Version 0.x.x**: Unstable development versions. The format may change
//!   in breaking ways between any 0.x releases.
//!
//! - **Version 1.x.x** (future): Breaking changes only in major version bumps.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::FormatError;
use crate::data::PixelCalibration;
use crate::model::{ObjectHierarchy, PathObject};

/// A project as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Format version for compatibility checking.
    pub version: String,

    /// Slide image, relative to the project file or absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,

    /// Calibration to use instead of whatever the image reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PixelCalibration>,

    /// All objects, in any order.
    #[serde(default)]
    pub objects: Vec<PathObject>,

    #[serde(default)]
    pub metadata: ProjectMetadata,
}

impl ProjectFile {
    /// Current version of the project file format.
    pub const CURRENT_VERSION: &'static str = "0.1.0";

    /// Major version number for compatibility checking.
    pub const VERSION_MAJOR: u32 = 0;

    /// Minor version number.
    pub const VERSION_MINOR: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            image: None,
            calibration: None,
            objects: Vec::new(),
            metadata: ProjectMetadata::new(),
        }
    }

    /// Parse a version string into (major, minor, patch) components.
    ///
    /// Returns None if the version string is invalid.
    pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((major, minor, patch))
    }

    /// Check if a version is compatible with the current version.
    ///
    /// For version 0.x.x only exact minor version matches are compatible.
    pub fn is_version_compatible(file_version: &str) -> bool {
        let Some((file_major, file_minor, _)) = Self::parse_version(file_version) else {
            return false;
        };

        if Self::VERSION_MAJOR == 0 {
            file_major == 0 && file_minor == Self::VERSION_MINOR
        } else {
            file_major == Self::VERSION_MAJOR
        }
    }

    /// Check if we can attempt to read a file, possibly with warnings.
    pub fn is_version_readable(file_version: &str) -> bool {
        let Some((file_major, _, _)) = Self::parse_version(file_version) else {
            return false;
        };
        file_major == 0 || file_major == Self::VERSION_MAJOR
    }

    /// Snapshot a hierarchy into a project.
    pub fn from_hierarchy(hierarchy: &ObjectHierarchy) -> Self {
        Self {
            objects: hierarchy.iter().cloned().collect(),
            ..Self::new()
        }
    }

    /// Rebuild the hierarchy, inserting parents before children.
    pub fn to_hierarchy(&self) -> Result<ObjectHierarchy, FormatError> {
        let ids: BTreeSet<_> = self.objects.iter().map(|o| o.id).collect();
        if ids.len() != self.objects.len() {
            return Err(FormatError::invalid_format("duplicate object ids"));
        }
        if let Some(orphan) = self
            .objects
            .iter()
            .find(|o| o.parent.is_some_and(|p| !ids.contains(&p)))
        {
            return Err(FormatError::invalid_format(format!(
                "object {} refers to missing parent {:?}",
                orphan.id, orphan.parent
            )));
        }

        let mut hierarchy = ObjectHierarchy::new();
        let mut remaining: Vec<&PathObject> = self.objects.iter().collect();
        while !remaining.is_empty() {
            let before = remaining.len();
            let mut deferred = Vec::new();
            for object in remaining {
                match object.parent {
                    Some(p) if hierarchy.get(p).is_none() => deferred.push(object),
                    _ => hierarchy.insert(object.clone())?,
                }
            }
            if deferred.len() == before {
                return Err(FormatError::invalid_format(format!(
                    "parent links form a cycle among {} objects",
                    before
                )));
            }
            remaining = deferred;
        }
        Ok(hierarchy)
    }

    /// Replace the stored objects with the current state of `hierarchy`.
    pub fn update_objects(&mut self, hierarchy: &ObjectHierarchy) {
        self.objects = hierarchy.iter().cloned().collect();
        self.metadata.touch();
    }

    /// Image path resolved against the directory of `project_path`.
    pub fn resolve_image(&self, project_path: &Path) -> Option<PathBuf> {
        let image = self.image.as_ref()?;
        if image.is_absolute() {
            return Some(image.clone());
        }
        Some(
            project_path
                .parent()
                .map(|dir| dir.join(image))
                .unwrap_or_else(|| image.clone()),
        )
    }

    pub fn to_json(&self) -> Result<String, FormatError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and check the version.
    pub fn from_json(json: &str) -> Result<Self, FormatError> {
        let project: Self = serde_json::from_str(json)?;

        if !Self::is_version_readable(&project.version) {
            return Err(FormatError::VersionMismatch {
                expected: Self::CURRENT_VERSION.to_string(),
                found: project.version.clone(),
            });
        }

        if !Self::is_version_compatible(&project.version) {
            log::warn!(
                "Project version {} may not be fully compatible with current version {} \
                 (version 0.x.x is unstable - format may have changed)",
                project.version,
                Self::CURRENT_VERSION
            );
        }

        Ok(project)
    }

    pub fn load(path: &Path) -> Result<Self, FormatError> {
        log::info!("Loading project from {:?}", path);
        let json = std::fs::read_to_string(path)?;
        let project = Self::from_json(&json)?;
        log::info!(
            "Loaded {} objects (format version {})",
            project.objects.len(),
            project.version
        );
        Ok(project)
    }

    pub fn save(&self, path: &Path) -> Result<(), FormatError> {
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved {} objects to {:?}", self.objects.len(), path);
        Ok(())
    }
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Who wrote the file and when.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// Last modification, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_unix: Option<u64>,
}

impl ProjectMetadata {
    pub fn new() -> Self {
        Self {
            created_by: Some(format!("tmalign {}", env!("CARGO_PKG_VERSION"))),
            modified_unix: Some(Self::now()),
        }
    }

    /// Update the modified timestamp.
    pub fn touch(&mut self) {
        self.modified_unix = Some(Self::now());
    }

    fn now() -> u64 {
        web_time::SystemTime::now()
            .duration_since(web_time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
