//! Shell pattern matching on strings (`case`, `${x#pat}`, `${x/pat/rep}`)
//!
//! Patterns are compiled with the `glob` crate so pathname expansion and
//! string matching share one engine. Quoted pattern text has already been
//! escaped by the expander.

use glob::{MatchOptions, Pattern};

use crate::ast::ReplaceAnchor;

const STRING_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled shell pattern. Text that is not a valid glob matches
/// literally.
#[derive(Debug, Clone)]
pub struct ShellPattern {
    pattern: Pattern,
}

impl ShellPattern {
    pub fn new(text: &str) -> Self {
        let translated = text.replace("[^", "[!");
        let pattern = Pattern::new(&translated)
            .or_else(|_| Pattern::new(&Pattern::escape(text)))
            .unwrap_or_default();
        ShellPattern { pattern }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.matches_with(text, STRING_MATCH)
    }
}

/// Does `text` contain an unescaped glob metacharacter?
pub fn has_glob_chars(text: &str) -> bool {
    text.contains(&['*', '?', '['][..])
}

/// Byte offsets of every char boundary, including the end
fn boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// `${x#pat}` / `${x##pat}`
pub fn remove_prefix(text: &str, pattern: &ShellPattern, longest: bool) -> String {
    let cuts = boundaries(text);
    let mut order: Box<dyn Iterator<Item = &usize>> = if longest {
        Box::new(cuts.iter().rev())
    } else {
        Box::new(cuts.iter())
    };
    match order.find(|&&cut| pattern.matches(&text[..cut])) {
        Some(&cut) => text[cut..].to_string(),
        None => text.to_string(),
    }
}

/// `${x%pat}` / `${x%%pat}`
pub fn remove_suffix(text: &str, pattern: &ShellPattern, longest: bool) -> String {
    let cuts = boundaries(text);
    let mut order: Box<dyn Iterator<Item = &usize>> = if longest {
        Box::new(cuts.iter())
    } else {
        Box::new(cuts.iter().rev())
    };
    match order.find(|&&cut| pattern.matches(&text[cut..])) {
        Some(&cut) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Longest match of `pattern` starting at byte `start`
fn longest_match_at(text: &str, start: usize, cuts: &[usize], pattern: &ShellPattern) -> Option<usize> {
    cuts.iter()
        .rev()
        .filter(|&&end| end >= start)
        .find(|&&end| pattern.matches(&text[start..end]))
        .copied()
}

/// `${x/pat/rep}`, `${x//pat/rep}`, `${x/#pat/rep}`, `${x/%pat/rep}`
pub fn replace(
    text: &str,
    pattern: &ShellPattern,
    replacement: &str,
    all: bool,
    anchor: ReplaceAnchor,
) -> String {
    let cuts = boundaries(text);
    match anchor {
        ReplaceAnchor::Start => match longest_match_at(text, 0, &cuts, pattern) {
            Some(end) => format!("{}{}", replacement, &text[end..]),
            None => text.to_string(),
        },
        ReplaceAnchor::End => {
            match cuts.iter().find(|&&start| pattern.matches(&text[start..])) {
                Some(&start) => format!("{}{}", &text[..start], replacement),
                None => text.to_string(),
            }
        }
        ReplaceAnchor::Anywhere => {
            let mut out = String::with_capacity(text.len());
            let mut i = 0;
            let mut replaced = false;
            while i < cuts.len() {
                let start = cuts[i];
                if start == text.len() {
                    break;
                }
                if !replaced || all {
                    // Empty matches are skipped so `//` always advances
                    if let Some(end) = longest_match_at(text, start, &cuts, pattern).filter(|&e| e > start) {
                        out.push_str(replacement);
                        replaced = true;
                        i = cuts.iter().position(|&c| c == end).unwrap_or(cuts.len());
                        continue;
                    }
                }
                let next = cuts.get(i + 1).copied().unwrap_or(text.len());
                out.push_str(&text[start..next]);
                i += 1;
            }
            out
        }
    }
}
