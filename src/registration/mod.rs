//! Intensity-based image registration.

mod ecc;

pub use ecc::{EccConfig, EccResult, RegistrationError, find_transform_ecc};
