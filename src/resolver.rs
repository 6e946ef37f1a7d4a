//! Name Resolver - field key to layer id, through ordered fallback tiers
//!
//! Tiers are tried strictly in order and the first hit wins. Each tier is a
//! pure strategy over the slot index; none of them touch the document.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::host::LayerId;
use crate::index::SlotIndex;
use crate::manifest::Method;

/// Suffixes appended by grid-variant (`_k`, `_ex`) and two-column (`a`/`b`)
/// layouts, in the order they are tried.
pub const SUFFIXES: [&str; 12] = [
    "_k", " k", "k", "_ex", " ex", "ex", "_a", " a", "a", "_b", " b", "b",
];

/// Field families whose layer names drift between templates. A key
/// containing `marker` is retried under every alternate base name.
pub struct DomainFamily {
    pub marker: &'static str,
    pub bases: &'static [&'static str],
}

pub const DOMAIN_FAMILIES: [DomainFamily; 2] = [
    DomainFamily {
        marker: "ean",
        bases: &["ean", "ean:", "ean_label", "ean-number", "ean number"],
    },
    DomainFamily {
        marker: "dostupnost",
        bases: &["dostupnost"],
    },
];

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: LayerId,
    pub method: Method,
    /// The index key that matched.
    pub matched: String,
}

/// A tier hit before it is tagged with the tier's method.
pub type Hit = (LayerId, String);

/// One fallback strategy.
pub trait ResolveTier {
    fn method(&self) -> Method;
    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit>;
}

// Callers pass lowercase names, so `name` is the index key on a hit.
fn lookup(name: &str, slot: &SlotIndex) -> Option<Hit> {
    slot.get(name).map(|id| (id, name.to_string()))
}

/// Separator rewrites tried for a name, in order.
pub fn separator_variants(name: &str) -> Vec<String> {
    let mut out = vec![
        name.replace('_', " "),
        name.replace(' ', "_"),
        name.replace(':', ""),
        name.replace(' ', ": "),
        name.replace('_', ": "),
        // Later template revisions also spell colons as separators.
        name.replace(':', "_"),
        collapse_spaces(&name.replace(':', " ")),
    ];
    out.dedup();
    out
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Direct lookup, then every separator variant.
fn check_variants(name: &str, slot: &SlotIndex) -> Option<Hit> {
    if let Some(hit) = lookup(name, slot) {
        return Some(hit);
    }
    separator_variants(name)
        .iter()
        .find_map(|v| lookup(v, slot))
}

/// Separator variants of `name`, then of `name` + each suffix.
fn check_with_suffixes(name: &str, slot: &SlotIndex) -> Option<Hit> {
    check_variants(name, slot).or_else(|| {
        SUFFIXES
            .iter()
            .find_map(|s| check_variants(&format!("{name}{s}"), slot))
    })
}

pub struct DirectTier;

impl ResolveTier for DirectTier {
    fn method(&self) -> Method {
        Method::Direct
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        lookup(key, slot)
    }
}

pub struct VariantTier;

impl ResolveTier for VariantTier {
    fn method(&self) -> Method {
        Method::Variant
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        separator_variants(key)
            .iter()
            .find_map(|v| lookup(v, slot))
    }
}

pub struct SuffixTier;

impl ResolveTier for SuffixTier {
    fn method(&self) -> Method {
        Method::Suffix
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        SUFFIXES
            .iter()
            .find_map(|s| check_variants(&format!("{key}{s}"), slot))
    }
}

pub struct DomainTier;

impl DomainTier {
    /// Trailing `[_ ]`-separated suffix of a key (`ean-number_03` → `03`).
    fn trailing_suffix(key: &str) -> String {
        static TRAILING: OnceLock<Regex> = OnceLock::new();
        let re = TRAILING.get_or_init(|| Regex::new(r"[_ ](\w+)$").expect("static regex"));
        re.captures(key)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

impl ResolveTier for DomainTier {
    fn method(&self) -> Method {
        Method::Domain
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        let family = DOMAIN_FAMILIES.iter().find(|f| key.contains(f.marker))?;
        let suffix = Self::trailing_suffix(key);
        family.bases.iter().find_map(|base| {
            [
                format!("{base}_{suffix}"),
                format!("{base} {suffix}"),
                format!("{base}{suffix}"),
                base.to_string(),
            ]
            .iter()
            .find_map(|candidate| check_with_suffixes(candidate, slot))
        })
    }
}

pub struct FuzzyTier;

impl FuzzyTier {
    /// `^base.*c1.*c2...` where `base` is the key's leading alphabetic run
    /// and `c1..` the characters of its digit-led tail, separators dropped.
    fn pattern(key: &str) -> Option<Regex> {
        static PARTS: OnceLock<(Regex, Regex)> = OnceLock::new();
        let (base_re, tail_re) = PARTS.get_or_init(|| {
            (
                Regex::new(r"^([a-z\-]+)").expect("static regex"),
                Regex::new(r"(\d+.*)$").expect("static regex"),
            )
        });
        let base = base_re.captures(key)?.get(1)?.as_str();
        let tail = tail_re.captures(key)?.get(1)?.as_str();

        let mut pattern = format!("^{}", regex::escape(base));
        for c in tail.chars().filter(|c| *c != '_' && *c != ' ') {
            pattern.push_str(".*");
            pattern.push_str(&regex::escape(&c.to_string()));
        }
        Regex::new(&pattern).ok()
    }
}

impl ResolveTier for FuzzyTier {
    fn method(&self) -> Method {
        Method::Fuzzy
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        let re = Self::pattern(key)?;
        slot.iter()
            .find(|(k, _)| re.is_match(k))
            .map(|(k, id)| (id, k.to_string()))
    }
}

pub struct AlphanumericTier;

fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

impl ResolveTier for AlphanumericTier {
    fn method(&self) -> Method {
        Method::Alphanumeric
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        let wanted = alphanumeric(key);
        if wanted.is_empty() {
            return None;
        }
        slot.iter()
            .find(|(k, _)| alphanumeric(k) == wanted)
            .map(|(k, id)| (id, k.to_string()))
    }
}

/// Drops the last `_` part of a key with more than two (`nazev_01a_k` →
/// `nazev_01a`) and retries the direct, variant and suffix tiers.
pub struct TrimmedTier;

impl ResolveTier for TrimmedTier {
    fn method(&self) -> Method {
        Method::Trimmed
    }

    fn resolve(&self, key: &str, slot: &SlotIndex) -> Option<Hit> {
        let parts: Vec<&str> = key.split('_').collect();
        if parts.len() <= 2 {
            return None;
        }
        let base = parts[..parts.len() - 1].join("_");
        check_with_suffixes(&base, slot)
    }
}

/// Ordered tier list.
pub struct Resolver {
    tiers: Vec<Box<dyn ResolveTier + Send + Sync>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            tiers: vec![
                Box::new(DirectTier),
                Box::new(VariantTier),
                Box::new(SuffixTier),
                Box::new(DomainTier),
                Box::new(FuzzyTier),
                Box::new(AlphanumericTier),
                Box::new(TrimmedTier),
            ],
        }
    }

    /// Append a tier after the built-in ones.
    pub fn with_tier(mut self, tier: impl ResolveTier + Send + Sync + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    pub fn methods(&self) -> Vec<Method> {
        self.tiers.iter().map(|t| t.method()).collect()
    }

    /// Resolve `key` within one slot. `None` is an expected outcome.
    pub fn resolve(&self, slot: &SlotIndex, key: &str) -> Option<Resolution> {
        let lower = key.to_lowercase();
        for tier in &self.tiers {
            if let Some((id, matched)) = tier.resolve(&lower, slot) {
                if tier.method() != Method::Direct {
                    debug!(slot = slot.name(), key, matched = %matched, method = tier.method().as_str(), "fallback match");
                }
                return Some(Resolution {
                    id,
                    method: tier.method(),
                    matched,
                });
            }
        }
        debug!(
            slot = slot.name(),
            key,
            available = %slot.keys().collect::<Vec<_>>().join(", "),
            "no layer matched"
        );
        None
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
