// Action Reference Scanner
// Finds (actionId, parameterName) references inside formula expressions

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default formula start marker
pub const FORMULA_START: &str = "@{";
/// Default formula end marker
pub const FORMULA_END: &str = "}";

/// Identifiers that select a view of an action rather than a parameter
const SPECIAL_REFS: [&str; 3] = ["in", "out", "action"];

/// Markers delimiting a formula inside parameter text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaDelimiters {
    pub start: String,
    pub end: String,
}

impl Default for FormulaDelimiters {
    fn default() -> Self {
        Self {
            start: FORMULA_START.to_string(),
            end: FORMULA_END.to_string(),
        }
    }
}

impl FormulaDelimiters {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A reference to a parameter of another action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionReference {
    pub action_id: String,
    pub param_name: String,
}

impl ActionReference {
    pub fn new(action_id: impl Into<String>, param_name: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            param_name: param_name.into(),
        }
    }
}

impl fmt::Display for ActionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.action_id, self.param_name)
    }
}

/// Non-fatal findings reported alongside the references
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    /// The text has an unbalanced single quote
    OddQuoteCount { count: usize },
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanWarning::OddQuoteCount { count } => write!(
                f,
                "text contains an odd number of quotes ({}), a string literal may be unclosed",
                count
            ),
        }
    }
}

/// Output of a scan: unique references in first-seen order, plus warnings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub references: Vec<ActionReference>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Stateless scanner for action references in formula text
#[derive(Debug, Clone, Default)]
pub struct ReferenceScanner {
    delimiters: FormulaDelimiters,
}

impl ReferenceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiters(delimiters: FormulaDelimiters) -> Self {
        Self { delimiters }
    }

    pub fn delimiters(&self) -> &FormulaDelimiters {
        &self.delimiters
    }

    /// Extract the references from `text`
    pub fn find_references(&self, text: &str) -> Vec<ActionReference> {
        self.scan(text).references
    }

    /// Extract the references from `text` along with diagnostics
    pub fn scan(&self, text: &str) -> ScanResult {
        let mut result = ScanResult::default();

        let quotes = text.chars().filter(|c| *c == '\'').count();
        if quotes % 2 != 0 {
            tracing::warn!(text = %text, quotes, "odd number of quotes in formula text");
            result
                .warnings
                .push(ScanWarning::OddQuoteCount { count: quotes });
        }

        let stripped: Vec<char> = strip_literals(text).chars().collect();
        if stripped.iter().all(|c| c.is_whitespace()) {
            return result;
        }

        let start: Vec<char> = self.delimiters.start.chars().collect();
        let end: Vec<char> = self.delimiters.end.chars().collect();
        if start.is_empty() || end.is_empty() {
            return result;
        }

        let mut seen = HashSet::new();
        let mut from = 0;
        while let Some((expr_start, expr_end)) = find_expression(&stripped, from, &start, &end) {
            let body_start = expr_start + start.len();
            for reference in references_in(&stripped, body_start, expr_end) {
                if seen.insert(reference.clone()) {
                    result.references.push(reference);
                }
            }
            from = expr_end + end.len();
        }

        result
    }
}

/// Replace every single-quoted literal with an empty literal (`''`)
pub fn strip_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '\'' {
            // An unclosed literal is left as is
            if let Some(close) = (i + 1..chars.len()).find(|&j| chars[j] == '\'') {
                out.push_str("''");
                i = close + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Locate the next formula at or after `from`. Returns the index of its start
/// marker and the index of its matching end marker.
pub(crate) fn find_expression(
    text: &[char],
    from: usize,
    start: &[char],
    end: &[char],
) -> Option<(usize, usize)> {
    let expr_start = index_of(text, start, from)?;
    let mut depth = 0usize;
    let mut i = expr_start;

    while i < text.len() {
        if matches_at(text, i, start) {
            depth += 1;
            i += start.len();
        } else if matches_at(text, i, end) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some((expr_start, i));
            }
            i += end.len();
        } else {
            i += 1;
        }
    }

    None
}

/// References inside `text[body_start..body_end]`
fn references_in(text: &[char], body_start: usize, body_end: usize) -> Vec<ActionReference> {
    let mut found = Vec::new();
    let mut cursor = body_start;
    let mut in_quote = false;
    let mut quote_pos = body_start;

    loop {
        let Some(dot) = (cursor..body_end).find(|&i| text[i] == '.') else {
            break;
        };

        // Keep the quote state in step with the candidate position
        while quote_pos < dot {
            if text[quote_pos] == '\'' {
                in_quote = !in_quote;
            }
            quote_pos += 1;
        }

        cursor = dot + 1;
        if in_quote {
            continue;
        }

        let Some((param_name, param_end)) = read_param_name(text, dot + 1, body_end) else {
            continue;
        };

        let id_start = (body_start..dot)
            .rev()
            .take_while(|&i| is_id_char(text[i]))
            .last();
        let Some(id_start) = id_start else {
            continue;
        };

        let action_id: String = text[id_start..dot].iter().collect();
        found.push(ActionReference::new(action_id, param_name));
        cursor = param_end;
    }

    found
}

/// Read the parameter name following a dot, skipping `in`/`out`/`action`.
/// Returns the name and the index just past it.
fn read_param_name(text: &[char], from: usize, limit: usize) -> Option<(String, usize)> {
    let (name, end) = read_identifier(text, from, limit)?;

    let (name, end) = if SPECIAL_REFS.contains(&name.as_str()) && end < limit && text[end] == '.'
    {
        read_identifier(text, end + 1, limit)?
    } else {
        (name, end)
    };

    // A following '(' means this is a method call, not a parameter
    if end < limit && text[end] == '(' {
        return None;
    }

    Some((name, end))
}

fn read_identifier(text: &[char], from: usize, limit: usize) -> Option<(String, usize)> {
    if from >= limit || !is_identifier_start(text[from]) {
        return None;
    }

    let mut end = from + 1;
    while end < limit && is_identifier_part(text[end]) {
        end += 1;
    }

    Some((text[from..end].iter().collect(), end))
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || is_currency_symbol(ch)
}

fn is_identifier_part(ch: char) -> bool {
    is_identifier_start(ch) || ch.is_numeric()
}

pub(crate) fn is_id_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

pub(crate) fn is_currency_symbol(ch: char) -> bool {
    matches!(
        ch,
        '$' | '\u{a2}'..='\u{a5}' | '\u{58f}' | '\u{60b}' | '\u{9f2}' | '\u{9f3}' | '\u{e3f}'
            | '\u{17db}' | '\u{20a0}'..='\u{20c0}' | '\u{fdfc}' | '\u{fe69}' | '\u{ff04}'
    )
}

pub(crate) fn matches_at(text: &[char], at: usize, pattern: &[char]) -> bool {
    at + pattern.len() <= text.len() && text[at..at + pattern.len()] == *pattern
}

pub(crate) fn index_of(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > text.len() {
        return None;
    }
    (from..=text.len() - pattern.len()).find(|&i| matches_at(text, i, pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(text: &str) -> Vec<(String, String)> {
        ReferenceScanner::new()
            .find_references(text)
            .into_iter()
            .map(|r| (r.action_id, r.param_name))
            .collect()
    }

    fn pair(id: &str, param: &str) -> (String, String) {
        (id.to_string(), param.to_string())
    }

    #[test]
    fn test_simple_reference() {
        assert_eq!(refs("@{id_615.messageID}"), vec![pair("id_615", "messageID")]);
    }

    #[test]
    fn test_reference_with_surrounding_text() {
        assert_eq!(
            refs("SomeText.Before@{id_615.messageID}SomeText.After"),
            vec![pair("id_615", "messageID")]
        );
    }

    #[test]
    fn test_multiple_expressions_in_path() {
        assert_eq!(
            refs("/tools/data/@{id1.TradeDate}/report_@{id2.BusinessDate}.csv"),
            vec![pair("id1", "TradeDate"), pair("id2", "BusinessDate")]
        );
    }

    #[test]
    fn test_nested_function_calls() {
        assert_eq!(
            refs("@{round(round(mul(id_3.TradePrice, id13.TradeQuantity),2),2)}"),
            vec![pair("id_3", "TradePrice"), pair("id13", "TradeQuantity")]
        );
    }

    #[test]
    fn test_mixed_text_and_functions() {
        assert_eq!(
            refs(":22H::@{id_9.Currency}/@{mul(id_3.TradePrice, id13.TradeQuantity)}"),
            vec![
                pair("id_9", "Currency"),
                pair("id_3", "TradePrice"),
                pair("id13", "TradeQuantity")
            ]
        );
    }

    #[test]
    fn test_digit_leading_id() {
        assert_eq!(refs("@{12.Currency}"), vec![pair("12", "Currency")]);
    }

    #[test]
    fn test_unusual_parameter_names() {
        assert_eq!(refs("@{id1._Qty}"), vec![pair("id1", "_Qty")]);
        assert_eq!(refs("@{id1._123}"), vec![pair("id1", "_123")]);
        assert_eq!(refs("@{id9.$env}"), vec![pair("id9", "$env")]);
        assert_eq!(refs("@{id8.$1}"), vec![pair("id8", "$1")]);
    }

    #[test]
    fn test_dot_inside_literal_ignored() {
        assert_eq!(
            refs("@{format(id1.TradeDate,'MM.yyyy')}"),
            vec![pair("id1", "TradeDate")]
        );
    }

    #[test]
    fn test_decimal_number_is_not_reference() {
        assert_eq!(
            refs("@{mul(id1.Qty, 0.0004B)}"),
            vec![pair("id1", "Qty")]
        );
        assert!(refs("@{123.09+12}").is_empty());
    }

    #[test]
    fn test_special_refs_skipped() {
        assert_eq!(
            refs("@{id_16.out.MessageIsFound}"),
            vec![pair("id_16", "MessageIsFound")]
        );
        assert_eq!(
            refs("@{id_16.in.MessageIsFound}"),
            vec![pair("id_16", "MessageIsFound")]
        );
        assert_eq!(refs("@{id4.action.failReason}"), vec![pair("id4", "failReason")]);
    }

    #[test]
    fn test_method_call_rejected() {
        assert!(refs("@{id.toString()}").is_empty());
        assert_eq!(refs("@{id.Field.toString()}"), vec![pair("id", "Field")]);
        assert_eq!(
            refs("ACTU/USD@{addComma(id_2.TradePrice.toString())}"),
            vec![pair("id_2", "TradePrice")]
        );
        assert_eq!(
            refs("@{id3.Params.split(',')[0]}"),
            vec![pair("id3", "Params")]
        );
        assert_eq!(
            refs("@{id3.in.Params.split(',')[0]}"),
            vec![pair("id3", "Params")]
        );
    }

    #[test]
    fn test_ternary_with_literals() {
        assert_eq!(
            refs("@{('APKE'.equals('ECLR') || 'APKE'.equals('SCOM')) ? 'SPRI':s1_id122.ActualSettlementDate}"),
            vec![pair("s1_id122", "ActualSettlementDate")]
        );
    }

    #[test]
    fn test_duplicates_collapsed_in_order() {
        assert_eq!(
            refs("@{a.b}_@{c.d}_@{e.f}"),
            vec![pair("a", "b"), pair("c", "d"), pair("e", "f")]
        );
        assert_eq!(
            refs("@{a.b}_@{c.d}_@{a.b}"),
            vec![pair("a", "b"), pair("c", "d")]
        );
    }

    #[test]
    fn test_markers_inside_literals() {
        assert_eq!(
            refs("@{'@{@{@{{}'  id1.tmp  '@}}@{}a.b'  }"),
            vec![pair("id1", "tmp")]
        );
        assert_eq!(refs("@{'a.b'  id1.tmp  'c.d'}"), vec![pair("id1", "tmp")]);
    }

    #[test]
    fn test_braces_inside_literal_pattern() {
        assert_eq!(
            refs("@{pattern('[A-Z]'+id1.Character+'[A-Z0-9]{3} '+id2.Code)}"),
            vec![pair("id1", "Character"), pair("id2", "Code")]
        );
    }

    #[test]
    fn test_nested_formulas() {
        assert_eq!(
            refs("@{SELECT * FROM tablename where column=@{id1.Param1} and row='@{a.b}' and id=@{id2.Param1}}"),
            vec![pair("id1", "Param1"), pair("id2", "Param1")]
        );
    }

    #[test]
    fn test_empty_results() {
        assert!(refs("").is_empty());
        assert!(refs(" \t").is_empty());
        assert!(refs("@{pattern('CUR.EUR')}").is_empty());
        assert!(refs("@{id_615.messageID").is_empty());
        assert!(refs("@{id_615....messageID}").is_empty());
        assert!(refs("id_615.messageID}").is_empty());
        assert!(refs("plain.text without markers").is_empty());
    }

    #[test]
    fn test_odd_quote_warning() {
        let result = ReferenceScanner::new().scan("@{id1.Name + 'abc}");
        assert_eq!(
            result.warnings,
            vec![ScanWarning::OddQuoteCount { count: 1 }]
        );
    }

    #[test]
    fn test_custom_delimiters() {
        let scanner = ReferenceScanner::with_delimiters(FormulaDelimiters::new("${", "}"));
        let found = scanner.find_references("x=${id1.Qty} y=@{id2.Qty}");
        assert_eq!(found, vec![ActionReference::new("id1", "Qty")]);
    }

    #[test]
    fn test_strip_literals() {
        assert_eq!(strip_literals("a 'b.c' d"), "a '' d");
        assert_eq!(strip_literals("'x''y'"), "''''");
        assert_eq!(strip_literals("unclosed 'abc"), "unclosed 'abc");
    }
}
