//! Document models
//!
//! Every collection stores loosely typed JSON documents; these are the typed
//! views the arena reads and writes.

mod document;
mod image;
mod rating;
mod study;
mod vote;

pub use document::{DocType, Document, DocumentRow};
pub use image::ImageMetadata;
pub use rating::EloRatingRecord;
pub use study::Study;
pub use vote::VoteRecord;
