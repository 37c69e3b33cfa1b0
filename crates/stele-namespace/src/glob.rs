//! Per-level glob matching for namespace search.
//!
//! Search patterns are split on `.` and each level is matched with shell
//! glob semantics: `*`, `?`, `[...]` (delegated to the `glob` crate) and
//! `{a,b}` alternation, which is expanded into plain patterns before
//! compilation.

use glob::Pattern;

/// The level pattern that matches every child.
pub const MATCH_ALL: &str = "*";

/// Returns whether a level contains any glob metacharacters.
#[must_use]
pub fn contains_expressions(level: &str) -> bool {
    level.contains(['*', '?', '[', ']', '{', '}'])
}

/// A compiled single-level pattern.
#[derive(Debug)]
pub struct GlobLevel {
    alternatives: Vec<Pattern>,
}

impl GlobLevel {
    /// Compiles one level of a search pattern.
    ///
    /// Returns `None` for syntactically invalid patterns; the search
    /// treats those as matching nothing rather than failing the query.
    #[must_use]
    pub fn compile(level: &str) -> Option<Self> {
        let mut alternatives = Vec::new();
        for expansion in expand_braces(level)? {
            alternatives.push(Pattern::new(&expansion).ok()?);
        }
        Some(Self { alternatives })
    }

    /// Matches a child name against the level.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.alternatives.iter().any(|p| p.matches(candidate))
    }
}

/// Expands `{a,b}` groups into one pattern per alternative.
///
/// Groups may nest and repeat; an unbalanced brace makes the whole
/// pattern invalid.
fn expand_braces(pattern: &str) -> Option<Vec<String>> {
    let Some(open) = pattern.find('{') else {
        return Some(vec![pattern.to_string()]);
    };

    let bytes = pattern.as_bytes();
    let mut depth = 0_usize;
    let mut close = None;
    let mut commas = Vec::new();
    for (i, &byte) in bytes.iter().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            b',' if depth == 1 => commas.push(i),
            _ => {}
        }
    }
    let close = close?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut parts = Vec::new();
    let mut start = open + 1;
    for &comma in &commas {
        parts.push(&pattern[start..comma]);
        start = comma + 1;
    }
    parts.push(&pattern[start..close]);

    let mut result = Vec::new();
    for part in parts {
        result.extend(expand_braces(&format!("{prefix}{part}{suffix}"))?);
    }
    Some(result)
}
