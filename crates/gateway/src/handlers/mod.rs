//! API handlers module

pub mod arena;
pub mod generate;
pub mod health;
pub mod results;

use genmedia_arena_common::generation::GeneratedImage;
use genmedia_arena_common::storage::public_url;
use serde::Serialize;

/// Image as returned to clients
#[derive(Debug, Serialize)]
pub struct ImageView {
    pub model: String,
    pub uri: String,
    pub url: String,
}

impl ImageView {
    pub fn new(image: GeneratedImage, url_prefix: &str) -> Self {
        Self {
            url: public_url(&image.uri, url_prefix),
            model: image.model,
            uri: image.uri,
        }
    }
}
