//! URL-safe slug generation.
//!
//! Slugs are the published filename and URL key of every asset, so they
//! must be unique within a run. A [`SlugGenerator`] is owned by the
//! [`RunContext`](crate::context::RunContext) and never shared between runs.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex_lite::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::error::{PipelineError, Result};
use crate::types::ResourceId;

/// Maximum length of the normalized title part of a slug.
pub const MAX_SLUG_LENGTH: usize = 100;

/// Number of identifier characters appended to disambiguate same-titled assets.
pub const ID_SUFFIX_LENGTH: usize = 6;

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s_]+").expect("static regex"))
}

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9-]").expect("static regex"))
}

fn hyphen_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-+").expect("static regex"))
}

/// Normalize a string to a lowercase, hyphenated ASCII token.
///
/// Diacritics are stripped via NFKD decomposition, whitespace and
/// underscores become single hyphens, everything else outside
/// `[a-z0-9-]` is dropped and the result is capped at [`MAX_SLUG_LENGTH`].
pub fn slugify(name: &str) -> Result<String> {
    let folded: String = name
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    let hyphenated = separators().replace_all(folded.trim(), "-");
    let cleaned = disallowed().replace_all(&hyphenated, "");
    let collapsed = hyphen_runs().replace_all(&cleaned, "-");
    let trimmed = collapsed.trim_matches('-');
    let capped: String = trimmed.chars().take(MAX_SLUG_LENGTH).collect();
    let slug = capped.trim_end_matches('-').to_string();

    if slug.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "slugification resulted in empty string for input: {name:?}"
        )));
    }
    Ok(slug)
}

/// Collision-free slug generator for one run.
#[derive(Debug, Default)]
pub struct SlugGenerator {
    /// Collisions seen so far per base slug.
    counters: HashMap<String, usize>,
    /// Every slug handed out.
    issued: HashSet<String>,
}

impl SlugGenerator {
    /// Create a fresh generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a unique slug for `title` belonging to entity `id`.
    ///
    /// The base is `{prefix}{slugify(title)}-{first 6 chars of id}`. The first
    /// request for a base returns it unchanged; later requests get `-1`,
    /// `-2`, ... appended.
    pub fn to_slug(&mut self, title: &str, id: &ResourceId, prefix: Option<&str>) -> Result<String> {
        if id.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "missing identifier for slug of {title:?}"
            )));
        }
        let mut base = format!("{}-{}", slugify(title)?, id.short(ID_SUFFIX_LENGTH));
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            base = format!("{prefix}{base}");
        }

        let mut slug = base.clone();
        loop {
            let count = self.counters.entry(base.clone()).or_insert(0);
            if self.issued.insert(slug.clone()) {
                if *count > 0 {
                    tracing::debug!(base = %base, slug = %slug, "Slug collision resolved");
                }
                return Ok(slug);
            }
            *count += 1;
            slug = format!("{base}-{count}");
        }
    }

    /// Number of slugs issued so far.
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    /// Whether no slug has been issued yet.
    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    /// Forget every issued slug.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.issued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_normalizes() {
        assert_eq!(slugify("  Old  Mill_House ").unwrap(), "old-mill-house");
        assert_eq!(slugify("Café Ré-union!").unwrap(), "cafe-re-union");
        assert_eq!(slugify("--a--b--").unwrap(), "a-b");
    }

    #[test]
    fn test_slugify_caps_length() {
        let long = "a".repeat(250);
        assert_eq!(slugify(&long).unwrap().len(), MAX_SLUG_LENGTH);
    }

    #[test]
    fn test_slugify_empty_is_invalid() {
        assert!(matches!(slugify("!!!"), Err(PipelineError::InvalidInput(_))));
        assert!(matches!(slugify(""), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn test_same_title_different_ids() {
        let mut slugs = SlugGenerator::new();
        let a = slugs.to_slug("Old Mill", &ResourceId::new("aaaaaa-1"), None).unwrap();
        let b = slugs.to_slug("Old Mill", &ResourceId::new("bbbbbb-1"), None).unwrap();
        assert_eq!(a, "old-mill-aaaaaa");
        assert_eq!(b, "old-mill-bbbbbb");
    }

    #[test]
    fn test_collision_suffixes() {
        let mut slugs = SlugGenerator::new();
        let id = ResourceId::new("abcdef-1");
        let other = ResourceId::new("abcdef-2");
        assert_eq!(slugs.to_slug("Old Mill", &id, None).unwrap(), "old-mill-abcdef");
        assert_eq!(slugs.to_slug("Old Mill", &other, None).unwrap(), "old-mill-abcdef-1");
        assert_eq!(slugs.to_slug("Old Mill", &id, None).unwrap(), "old-mill-abcdef-2");
        assert_eq!(slugs.len(), 3);
    }

    #[test]
    fn test_prefix_namespaces() {
        let mut slugs = SlugGenerator::new();
        let id = ResourceId::new("abcdef");
        assert_eq!(slugs.to_slug("Mill", &id, Some("ni-")).unwrap(), "ni-mill-abcdef");
        assert_eq!(slugs.to_slug("Mill", &id, None).unwrap(), "mill-abcdef");
    }

    #[test]
    fn test_missing_id_is_invalid() {
        let mut slugs = SlugGenerator::new();
        let err = slugs.to_slug("Mill", &ResourceId::new(""), None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_fresh_generator_is_deterministic() {
        let run = || {
            let mut slugs = SlugGenerator::new();
            (0..3)
                .map(|_| slugs.to_slug("Bridge", &ResourceId::new("123456"), None).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
