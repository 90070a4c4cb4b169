//! Pipeline stages, in execution order.
//!
//! Each stage is a plain function over the backend traits. Sequencing,
//! context threading and teardown live in [`crate::pipeline`].

pub mod s01_provision;
pub mod s02_install;
pub mod s03_console;
pub mod s04_poll;
pub mod s05_export;
pub mod s06_manifest;
