pub mod types;
pub mod dimensions;
pub mod scorer;

pub use types::*;
pub use scorer::QualityScorer;
