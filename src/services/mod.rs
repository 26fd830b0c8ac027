//! Stores, rendering, and the resize pipeline.

pub mod content_service;
pub mod derivative;
pub mod identity;
pub mod metadata_service;
pub mod resizer;
