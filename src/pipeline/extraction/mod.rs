pub mod types;
pub mod sanitize;
pub mod quality;
pub mod pages;
pub mod scan;
pub mod engines;
pub mod page_images;
pub mod ocr;
pub mod fallback;

#[cfg(test)]
pub mod testing;

pub use types::*;
pub use sanitize::*;
pub use quality::assess_quality_tier;
pub use pages::*;
pub use scan::*;
pub use engines::*;
pub use page_images::{page_images, PageImage};
pub use ocr::*;
pub use fallback::*;
