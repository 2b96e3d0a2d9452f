// Action Id Sanitizer
// Maps digit-leading action ids to identifiers the formula language accepts

use crate::expression::scanner::is_id_char;

use std::collections::{HashMap, HashSet};

/// Prefix given to ids that cannot be used as formula identifiers
const SANITIZED_PREFIX: &str = "_id";

/// True if `id` cannot be used directly as a formula identifier
pub fn needs_sanitizing(id: &str) -> bool {
    id.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Id to sanitized-id mapping with a reverse lookup
#[derive(Debug, Clone, Default)]
pub struct IdSanitizer {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdSanitizer {
    /// Build the mapping for a matrix's action ids. Generated names never
    /// collide with an existing id.
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let ids: Vec<&str> = ids.into_iter().collect();
        let mut taken: HashSet<String> = ids.iter().map(|id| id.to_string()).collect();
        let mut sanitizer = Self::default();

        for id in ids.into_iter().filter(|id| needs_sanitizing(id)) {
            if sanitizer.forward.contains_key(id) {
                continue;
            }

            let mut candidate = format!("{}{}", SANITIZED_PREFIX, id);
            let mut suffix = 1;
            while taken.contains(&candidate) {
                candidate = format!("{}{}_{}", SANITIZED_PREFIX, id, suffix);
                suffix += 1;
            }

            taken.insert(candidate.clone());
            sanitizer.forward.insert(id.to_string(), candidate.clone());
            sanitizer.reverse.insert(candidate, id.to_string());
        }

        sanitizer
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// The identifier used for `id` inside formulas
    pub fn sanitize<'a>(&'a self, id: &'a str) -> &'a str {
        self.forward.get(id).map(String::as_str).unwrap_or(id)
    }

    /// The matrix id behind a sanitized identifier
    pub fn original(&self, sanitized: &str) -> Option<&str> {
        self.reverse.get(sanitized).map(String::as_str)
    }

    /// Replace mapped ids in front of every unquoted dot in `formula`
    pub fn rewrite(&self, formula: &str) -> String {
        if self.is_empty() {
            return formula.to_string();
        }

        let chars: Vec<char> = formula.chars().collect();
        let mut out = String::with_capacity(formula.len());
        let mut copied = 0;
        let mut in_quote = false;

        for (dot, &ch) in chars.iter().enumerate() {
            if ch == '\'' {
                in_quote = !in_quote;
                continue;
            }
            if ch != '.' || in_quote {
                continue;
            }
            // A digit after the dot is a decimal number, not a reference
            if chars.get(dot + 1).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }

            let mut id_start = dot;
            while id_start > copied && is_id_char(chars[id_start - 1]) {
                id_start -= 1;
            }
            let id: String = chars[id_start..dot].iter().collect();

            if let Some(sanitized) = self.forward.get(&id) {
                out.extend(&chars[copied..id_start]);
                out.push_str(sanitized);
                copied = dot;
            }
        }

        out.extend(&chars[copied..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_sanitizing() {
        assert!(needs_sanitizing("12"));
        assert!(needs_sanitizing("1abc"));
        assert!(!needs_sanitizing("id1"));
        assert!(!needs_sanitizing("_1"));
        assert!(!needs_sanitizing(""));
    }

    #[test]
    fn test_mapping_and_reverse_lookup() {
        let sanitizer = IdSanitizer::new(["12", "id1", "3x"]);

        assert_eq!(sanitizer.sanitize("12"), "_id12");
        assert_eq!(sanitizer.sanitize("3x"), "_id3x");
        assert_eq!(sanitizer.sanitize("id1"), "id1");
        assert_eq!(sanitizer.original("_id12"), Some("12"));
        assert_eq!(sanitizer.original("id1"), None);
    }

    #[test]
    fn test_generated_names_avoid_collisions() {
        let sanitizer = IdSanitizer::new(["12", "_id12"]);
        assert_eq!(sanitizer.sanitize("12"), "_id12_1");
        assert_eq!(sanitizer.original("_id12_1"), Some("12"));
    }

    #[test]
    fn test_rewrite_formula() {
        let sanitizer = IdSanitizer::new(["12", "id2"]);

        assert_eq!(
            sanitizer.rewrite("add(12.Qty, id2.Qty)"),
            "add(_id12.Qty, id2.Qty)"
        );
        assert_eq!(sanitizer.rewrite("12.in.Qty"), "_id12.in.Qty");
    }

    #[test]
    fn test_rewrite_skips_literals_and_decimals() {
        let sanitizer = IdSanitizer::new(["12"]);

        assert_eq!(sanitizer.rewrite("'12.Qty'"), "'12.Qty'");
        assert_eq!(sanitizer.rewrite("mul(12.5, 12.Qty)"), "mul(12.5, _id12.Qty)");
        assert_eq!(sanitizer.rewrite("x12.Qty"), "x12.Qty");
    }
}
