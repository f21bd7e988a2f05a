//! Character entropy and code-structure statistics over decoded text.
//!
//! Entropy here is computed over `char`s, not bytes: entries are decoded
//! lossily before analysis, so a replacement character counts as one symbol.
//!
//! Structure statistics look for declared class and method identifiers in two
//! syntaxes and union the results:
//! - keyword form (`class Foo`, `public static void bar(`), which matches
//!   decompiled source
//! - typed-signature form (`Lnet/x/Foo;` descriptors, `int bar(int a) {`),
//!   which matches raw class-file constant pools and terse source

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Identifiers this short are typical of name-mangling obfuscators.
const SHORT_IDENT_MAX: usize = 2;

static CLASS_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:class|interface|enum|record)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("valid regex")
});

static CLASS_DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"L(?:[A-Za-z0-9_$]+/)+([A-Za-z0-9_$]+);").expect("valid regex")
});

static METHOD_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:public|private|protected|static|final|synchronized|native|abstract)\s+(?:[A-Za-z0-9_$<>\[\].,?]+\s+)*?([A-Za-z_$][A-Za-z0-9_$]*)\s*\(",
    )
    .expect("valid regex")
});

static METHOD_TYPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[A-Za-z_$][A-Za-z0-9_$.<>\[\]]*\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\([^()]*\)\s*(?:throws\s+[A-Za-z0-9_$.,\s]+)?\{",
    )
    .expect("valid regex")
});

/// Words the method patterns can capture that are never method names.
const NOT_METHOD_NAMES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "synchronized", "return", "new", "else", "try",
    "do", "throw", "assert", "super", "this",
];

/// Shannon entropy in bits over the character distribution of `text`.
///
/// Empty input has entropy 0.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    let entropy = counts.values().fold(0.0f64, |acc, &count| {
        let p = count as f64 / len;
        acc - p * p.log2()
    });
    // A single-symbol distribution yields -0.0.
    entropy.max(0.0)
}

/// Statistics over one identifier class (classes or methods).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdentifierStats {
    pub total: usize,
    pub avg_length: f64,
    pub short_ratio: f64,
}

impl IdentifierStats {
    fn from_names(names: &HashSet<&str>) -> Self {
        if names.is_empty() {
            return Self::default();
        }
        let total = names.len();
        let lengths: usize = names.iter().map(|n| n.chars().count()).sum();
        let short = names
            .iter()
            .filter(|n| n.chars().count() <= SHORT_IDENT_MAX)
            .count();
        Self {
            total,
            avg_length: lengths as f64 / total as f64,
            short_ratio: short as f64 / total.max(1) as f64,
        }
    }
}

/// Declared-identifier statistics for a text blob.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CodeStructure {
    pub classes: IdentifierStats,
    pub methods: IdentifierStats,
}

/// Scan `text` for class and method declarations.
pub fn code_structure(text: &str) -> CodeStructure {
    let mut classes: HashSet<&str> = HashSet::new();
    for re in [&*CLASS_KEYWORD, &*CLASS_DESCRIPTOR] {
        classes.extend(re.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str()));
    }

    let mut methods: HashSet<&str> = HashSet::new();
    for re in [&*METHOD_KEYWORD, &*METHOD_TYPED] {
        methods.extend(
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|name| !NOT_METHOD_NAMES.contains(name)),
        );
    }

    CodeStructure {
        classes: IdentifierStats::from_names(&classes),
        methods: IdentifierStats::from_names(&methods),
    }
}
