//! Pattern provider and cache.
//!
//! Rule sets are TOML documents with two kinds of entries:
//!
//! ```toml
//! [[rule]]
//! name = "dlr"
//! pattern = '(?P<volume>\d+)\s+(?P<reporter>DLR)'
//!
//! [[term]]
//! code = "HCD"
//! label = "High Court Division"
//! aliases = ["High Court"]
//! ```
//!
//! Rules are regexes with named capture groups; terms form a registry of
//! known codes that can be looked up or searched for in text.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

pub const CITATIONS: &str = "citations";
pub const COURTS: &str = "courts";
pub const STATUTES: &str = "statutes";
pub const KEYWORDS: &str = "keywords";

const BUILTIN_SOURCES: [(&str, &str); 4] = [
    (CITATIONS, include_str!("rules/citations.toml")),
    (COURTS, include_str!("rules/courts.toml")),
    (STATUTES, include_str!("rules/statutes.toml")),
    (KEYWORDS, include_str!("rules/keywords.toml")),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("Pattern set not found: {name}")]
    NotFound { name: String },

    #[error("Pattern set '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

// ═══════════════════════════════════════════
// Compiled rule sets
// ═══════════════════════════════════════════

#[derive(Deserialize)]
struct RawPatternSet {
    #[serde(default)]
    rule: Vec<RawRule>,
    #[serde(default)]
    term: Vec<RawTerm>,
}

#[derive(Deserialize)]
struct RawRule {
    name: String,
    pattern: String,
    #[serde(default)]
    case_insensitive: bool,
}

#[derive(Deserialize)]
struct RawTerm {
    code: String,
    label: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// A named, compiled regex rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: String,
    pub regex: Regex,
}

impl PatternRule {
    /// Whether the regex declares a capture group with this name.
    pub fn has_group(&self, group: &str) -> bool {
        self.regex.capture_names().flatten().any(|n| n == group)
    }
}

/// A registry entry: a code with its display label and alternative spellings.
#[derive(Debug, Clone)]
pub struct Term {
    pub code: String,
    pub label: String,
    pub aliases: Vec<String>,
    matcher: Regex,
}

impl Term {
    /// Whole-word, case-insensitive matcher over the label and aliases.
    pub fn matcher(&self) -> &Regex {
        &self.matcher
    }

    /// True when `value` equals the code, label or an alias, ignoring case
    /// and surrounding whitespace.
    pub fn names(&self, value: &str) -> bool {
        let value = value.trim();
        self.code.eq_ignore_ascii_case(value)
            || self.label.eq_ignore_ascii_case(value)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(value))
    }
}

/// Compiled, read-only rule set.
#[derive(Debug, Clone)]
pub struct PatternSet {
    name: String,
    rules: Vec<PatternRule>,
    terms: Vec<Term>,
}

impl PatternSet {
    pub fn from_toml_str(name: &str, source: &str) -> Result<Self, PatternError> {
        let malformed = |reason: String| PatternError::Malformed {
            name: name.to_string(),
            reason,
        };

        let raw: RawPatternSet = toml::from_str(source).map_err(|e| malformed(e.to_string()))?;
        if raw.rule.is_empty() && raw.term.is_empty() {
            return Err(malformed("no rules or terms defined".into()));
        }

        let rules = raw
            .rule
            .into_iter()
            .map(|r| {
                RegexBuilder::new(&r.pattern)
                    .case_insensitive(r.case_insensitive)
                    .build()
                    .map(|regex| PatternRule {
                        name: r.name.clone(),
                        regex,
                    })
                    .map_err(|e| malformed(format!("rule '{}': {e}", r.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let terms = raw
            .term
            .into_iter()
            .map(|t| {
                let alternatives = std::iter::once(&t.label)
                    .chain(t.aliases.iter())
                    .map(|s| regex::escape(s.trim()))
                    .collect::<Vec<_>>()
                    .join("|");
                RegexBuilder::new(&format!(r"\b(?:{alternatives})\b"))
                    .case_insensitive(true)
                    .build()
                    .map(|matcher| Term {
                        code: t.code.clone(),
                        label: t.label.clone(),
                        aliases: t.aliases.clone(),
                        matcher,
                    })
                    .map_err(|e| malformed(format!("term '{}': {e}", t.code)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            rules,
            terms,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Registry lookup by code, label or alias.
    pub fn lookup(&self, value: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.names(value))
    }

    pub fn is_known(&self, value: &str) -> bool {
        self.lookup(value).is_some()
    }

    /// First term whose label or alias occurs in `text`.
    pub fn find_term(&self, text: &str) -> Option<&Term> {
        self.terms.iter().find(|t| t.matcher.is_match(text))
    }
}

// ═══════════════════════════════════════════
// Providers
// ═══════════════════════════════════════════

/// Source of named rule sets. Read-only from the pipeline's point of view.
pub trait PatternProvider: Send + Sync {
    fn load_patterns(&self, name: &str) -> Result<PatternSet, PatternError>;
}

/// Rule sets compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPatternProvider;

impl BuiltinPatternProvider {
    pub fn source(name: &str) -> Option<&'static str> {
        BUILTIN_SOURCES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, src)| *src)
    }
}

impl PatternProvider for BuiltinPatternProvider {
    fn load_patterns(&self, name: &str) -> Result<PatternSet, PatternError> {
        let source = Self::source(name).ok_or_else(|| PatternError::NotFound {
            name: name.to_string(),
        })?;
        PatternSet::from_toml_str(name, source)
    }
}

/// Caller-supplied TOML sources, keyed by set name.
#[derive(Debug, Default, Clone)]
pub struct StaticPatternProvider {
    sources: HashMap<String, String>,
}

impl StaticPatternProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the built-in sources so callers override only what they need.
    pub fn builtin() -> Self {
        let sources = BUILTIN_SOURCES
            .iter()
            .map(|(name, src)| (name.to_string(), src.to_string()))
            .collect();
        Self { sources }
    }

    pub fn with(mut self, name: &str, source: impl Into<String>) -> Self {
        self.sources.insert(name.to_string(), source.into());
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.sources.remove(name);
        self
    }
}

impl PatternProvider for StaticPatternProvider {
    fn load_patterns(&self, name: &str) -> Result<PatternSet, PatternError> {
        let source = self.sources.get(name).ok_or_else(|| PatternError::NotFound {
            name: name.to_string(),
        })?;
        PatternSet::from_toml_str(name, source)
    }
}

// ═══════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════

/// Loads each rule set once and serves shared handles until invalidated.
/// Load failures are returned to the caller and not cached.
pub struct PatternCache {
    provider: Arc<dyn PatternProvider>,
    sets: RwLock<HashMap<String, Arc<PatternSet>>>,
}

impl PatternCache {
    pub fn new(provider: Arc<dyn PatternProvider>) -> Self {
        Self {
            provider,
            sets: RwLock::new(HashMap::new()),
        }
    }

    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinPatternProvider))
    }

    pub fn get(&self, name: &str) -> Result<Arc<PatternSet>, PatternError> {
        if let Some(set) = self.read().get(name) {
            return Ok(Arc::clone(set));
        }

        let loaded = Arc::new(self.provider.load_patterns(name)?);
        tracing::debug!(
            set = name,
            rules = loaded.rules().len(),
            terms = loaded.terms().len(),
            "Pattern set loaded"
        );

        let mut sets = self.write();
        // Another caller may have loaded it meanwhile; keep the first copy.
        let set = sets
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&loaded));
        Ok(Arc::clone(set))
    }

    pub fn invalidate(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn invalidate_all(&self) {
        self.write().clear();
    }

    pub fn cached(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<PatternSet>>> {
        self.sets.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<PatternSet>>> {
        self.sets.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
