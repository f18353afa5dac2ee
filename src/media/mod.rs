//! Image inspection and display-variant rendering. Everything in here is
//! synchronous CPU work; async callers run it on the blocking pool.

pub mod metadata;
pub mod variants;

pub use metadata::{extract, ImageMetadata, MediaMetadata, TakenAtSource};
