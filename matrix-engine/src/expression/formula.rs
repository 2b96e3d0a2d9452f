// Formula Calculator
// Expands @{...} formulas inside action parameter text

use crate::expression::evaluator::{EvalError, Evaluator, FormulaContext};
use crate::expression::ids::IdSanitizer;
use crate::expression::scanner::{matches_at, FormulaDelimiters};

use thiserror::Error;

/// Upper bound on formula evaluations for one parameter
pub const MAX_FORMULA_ITERATIONS: usize = 100;

/// Errors raised while expanding the formulas of one parameter value
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalcError {
    #[error("invalid expression '{text}': formula is not closed with '{end}'")]
    Unclosed { text: String, end: String },

    #[error("formula expansion did not finish after {0} iterations")]
    TooManyIterations(usize),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Location of the innermost formula found in a text
#[derive(Debug, Clone, Copy)]
struct FormulaSpan {
    start: usize,
    body_start: usize,
    body_end: usize,
    after: usize,
    nested: bool,
}

/// Expands formulas, innermost first. Results of nested formulas are put
/// back into their enclosing formula as quoted literals, top-level results
/// are spliced into the surrounding text.
#[derive(Debug, Clone)]
pub struct FormulaCalculator {
    delimiters: FormulaDelimiters,
    max_iterations: usize,
}

impl Default for FormulaCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaCalculator {
    pub fn new() -> Self {
        Self {
            delimiters: FormulaDelimiters::default(),
            max_iterations: MAX_FORMULA_ITERATIONS,
        }
    }

    pub fn with_delimiters(mut self, delimiters: FormulaDelimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn delimiters(&self) -> &FormulaDelimiters {
        &self.delimiters
    }

    /// True if `text` contains a formula start marker
    pub fn has_formula(&self, text: &str) -> bool {
        text.contains(self.delimiters.start.as_str())
    }

    /// Expand every formula in `text`. Ids in front of dots are rewritten
    /// with `ids` before evaluation.
    pub fn calculate(
        &self,
        text: &str,
        context: &FormulaContext,
        ids: &IdSanitizer,
    ) -> Result<String, CalcError> {
        if !self.has_formula(text) {
            return Ok(text.to_string());
        }

        let evaluator = Evaluator::new(context);
        let mut output = String::new();
        let mut rest: Vec<char> = text.chars().collect();
        let mut iterations = 0;

        while let Some(span) = self.innermost(&rest, text)? {
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(CalcError::TooManyIterations(self.max_iterations));
            }

            let body: String = rest[span.body_start..span.body_end].iter().collect();
            let value = evaluator.evaluate_str(&ids.rewrite(&body))?;

            if span.nested {
                let literal: Vec<char> = value.to_literal().chars().collect();
                rest.splice(span.start..span.after, literal);
                continue;
            }

            // The whole parameter is one formula
            if output.is_empty() && span.start == 0 && span.after == rest.len() {
                return Ok(value.as_string());
            }

            output.extend(&rest[..span.start]);
            output.push_str(&value.as_string());
            rest.drain(..span.after);
        }

        output.extend(&rest);
        Ok(output)
    }

    /// Find the first formula whose end marker closes an open start marker.
    /// Quotes are only tracked inside formulas.
    fn innermost(&self, text: &[char], original: &str) -> Result<Option<FormulaSpan>, CalcError> {
        let start: Vec<char> = self.delimiters.start.chars().collect();
        let end: Vec<char> = self.delimiters.end.chars().collect();
        let mut open: Vec<usize> = Vec::new();
        let mut in_quote = false;
        let mut i = 0;

        while i < text.len() {
            if !open.is_empty() && text[i] == '\'' {
                in_quote = !in_quote;
                i += 1;
                continue;
            }
            if in_quote {
                i += 1;
                continue;
            }

            if matches_at(text, i, &start) {
                open.push(i);
                i += start.len();
                continue;
            }

            if matches_at(text, i, &end) {
                if let Some(formula_start) = open.pop() {
                    return Ok(Some(FormulaSpan {
                        start: formula_start,
                        body_start: formula_start + start.len(),
                        body_end: i,
                        after: i + end.len(),
                        nested: !open.is_empty(),
                    }));
                }
            }

            i += 1;
        }

        if open.is_empty() {
            Ok(None)
        } else {
            Err(CalcError::Unclosed {
                text: original.to_string(),
                end: self.delimiters.end.clone(),
            })
        }
    }
}
