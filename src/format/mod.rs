//! Project files: a slide reference plus its object hierarchy, as JSON.

mod error;
mod project;

#[cfg(test)]
mod tests;

pub use error::FormatError;
pub use project::{ProjectFile, ProjectMetadata};
