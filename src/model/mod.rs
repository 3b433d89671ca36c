//! Data models for objects, their geometry, and the hierarchy holding them.

mod hierarchy;
mod roi;

pub use hierarchy::{
    AnnotationHierarchy, HierarchyEvent, ObjectHierarchy, ObjectId, ObjectKind, PathObject,
};
pub use roi::{MIN_POLYGON_VERTICES, Roi};
