pub mod types;
pub mod patterns;
pub mod citation;
pub mod dates;
pub mod parties;
pub mod sections;
pub mod keywords;

pub use types::*;
pub use patterns::{
    BuiltinPatternProvider, PatternCache, PatternError, PatternProvider, PatternRule, PatternSet,
    StaticPatternProvider, Term,
};
pub use citation::{citation_key, CitationExtractor, CitationPass};
pub use dates::DatePass;
pub use parties::PartyPass;
pub use sections::SectionPass;
pub use keywords::{keyword_confidence, KeywordPass};

use std::sync::Arc;

/// The standard pass set, one per entity type.
pub fn default_passes() -> Vec<Arc<dyn EntityPass>> {
    vec![
        Arc::new(CitationPass::default()),
        Arc::new(DatePass::default()),
        Arc::new(PartyPass),
        Arc::new(SectionPass),
        Arc::new(KeywordPass),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_passes_cover_every_type_once() {
        let mut types: Vec<EntityType> = default_passes().iter().map(|p| p.entity_type()).collect();
        types.sort();
        assert_eq!(types, EntityType::ALL.to_vec());
    }
}
