//! Capture filesystem trees into Windows Imaging (WIM) archive images and
//! apply those images back onto NTFS volumes.
//!
//! An archive holds one or more images. Each image is a complete directory
//! tree: files, alternate data streams, reparse points, short (DOS) names,
//! NTFS security descriptors and timestamps. Stream content is stored once
//! per unique SHA-1 digest and shared across all images of an archive.

pub mod apply;
pub mod capture;
pub mod config;
pub mod error;
pub mod image;
pub mod lookup;
pub mod ondisk;
pub mod pattern;
pub mod progress;
pub mod resource;
pub mod security;
pub mod wim;

pub use apply::{ExtractFlags, NtfsVolume};
pub use capture::ImageSource;
pub use config::CaptureConfig;
pub use error::Error;
pub use progress::ProgressEvent;
pub use wim::{AddImageFlags, Wim, ALL_IMAGES};

pub type Result<T> = std::result::Result<T, crate::Error>;
