//! Core data models for the photo resize service.
//!
//! `size` is the fixed catalog of target dimensions; `photo` is the metadata
//! record that tracks which of those sizes have been materialized.

pub mod photo;
pub mod size;
