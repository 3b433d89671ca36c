//! Tests for the project file format.

mod project_tests;
