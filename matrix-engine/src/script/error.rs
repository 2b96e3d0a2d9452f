// Script error types with helpful error messages
// Provides line/column info, source context, and suggestions for common mistakes

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Surrounding source lines
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
    /// The kind of error
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// YAML syntax error
    YamlSyntax,
    /// Wrong types or missing fields
    InvalidSchema,
    /// Script file could not be read
    IoError,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
            kind: ParseErrorKind::InvalidSchema,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0).with_kind(ParseErrorKind::IoError)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach the source lines around the error, marking the error column
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let marker = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", marker, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column.saturating_sub(1)) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Build from a serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let kind = if err.to_string().contains("missing field")
            || err.to_string().contains("unknown field")
            || err.to_string().contains("invalid type")
            || err.to_string().contains("unknown variant")
        {
            ParseErrorKind::InvalidSchema
        } else {
            ParseErrorKind::YamlSyntax
        };

        let mut parse_error = ParseError::new(format_yaml_error_message(err), line, column)
            .with_kind(kind)
            .with_source_context(source, 2);
        parse_error.suggestion = suggest_yaml_fix(err, source, line);
        parse_error
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        if self.line > 0 {
            writeln!(f, "  --> line {}:{}", self.line, self.column)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Turn serde_yaml's messages into shorter ones
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if let Some(field) = extract_between(&msg, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }

    if let Some(field) = extract_between(&msg, "unknown field `", "`") {
        return format!("unknown field '{}'", field);
    }

    if let Some(variant) = extract_between(&msg, "unknown variant `", "`") {
        return format!("unknown value '{}'", variant);
    }

    if let (Some(found), Some(expected)) = (
        extract_between(&msg, "invalid type: ", ", expected"),
        extract_between(&msg, ", expected ", " at"),
    ) {
        return format!("expected {}, but found {}", expected, found);
    }

    msg
}

fn extract_between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

/// Suggest fixes for common run script mistakes
fn suggest_yaml_fix(err: &serde_yaml::Error, source: &str, line: usize) -> Option<String> {
    let msg = err.to_string();
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).copied().unwrap_or("");

    if msg.contains("missing field `id`") {
        return Some("every action needs an 'id' unique within its matrix".to_string());
    }

    if msg.contains("missing field `step`") {
        return Some("every action needs a 'step' naming the step it runs in".to_string());
    }

    if msg.contains("missing field `type`") {
        return Some("every action needs a 'type' selecting its handler".to_string());
    }

    if msg.contains("unknown variant") && error_line.contains("kind") {
        return Some(
            "step kind must be one of: default, sleep, askForContinue, waitAsyncActions"
                .to_string(),
        );
    }

    if msg.contains("unknown variant") && error_line.to_lowercase().contains("waitasyncend") {
        return Some("waitAsyncEnd must be one of: no, step, scheduler".to_string());
    }

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    // Common casing mistakes
    let typo_suggestions = [
        ("askforcontinue", "askForContinue"),
        ("askiffailed", "askIfFailed"),
        ("waitasyncendstep", "waitAsyncEndStep"),
        ("waitasyncend", "waitAsyncEnd"),
    ];

    for (typo, correct) in typo_suggestions {
        if error_line.contains(typo) {
            return Some(format!("did you mean '{}'?", correct));
        }
    }

    None
}

/// Result type for script loading
pub type ParseResult<T> = Result<T, ParseError>;

/// Validation error for semantic checks on a loaded script
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
    pub path: String,
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error at '{}': {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("missing required field 'step'", 7, 5)
            .with_suggestion("every action needs a 'step' naming the step it runs in");

        let output = format!("{}", err);
        assert!(output.contains("missing required field"));
        assert!(output.contains("line 7:5"));
        assert!(output.contains("help:"));
    }

    #[test]
    fn test_parse_error_with_source_context() {
        let source = "steps:\n  - name: Step1\nmatrices:\n  - name: m1\n    actions:\n      - id: id1";

        let err = ParseError::new("missing required field 'step'", 6, 9).with_source_context(source, 2);

        assert!(err.context.contains(">    6 |"));
        assert!(err.context.contains("id: id1"));
        assert!(err.context.contains("^"));
    }

    #[test]
    fn test_io_error_has_no_location() {
        let err = ParseError::io_error("failed to read 'run.yaml'");
        assert_eq!(err.kind, ParseErrorKind::IoError);
        assert!(!err.to_string().contains("-->"));
    }

    #[test]
    fn test_from_yaml_error_missing_field() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Probe {
            id: String,
            step: String,
        }

        let source = "id: id1\n";
        let err = serde_yaml::from_str::<Probe>(source).unwrap_err();
        let parse_error = ParseError::from_yaml_error(&err, source);

        assert_eq!(parse_error.message, "missing required field 'step'");
        assert_eq!(parse_error.kind, ParseErrorKind::InvalidSchema);
        assert!(parse_error.suggestion.is_some());
    }

    #[test]
    fn test_extract_between() {
        let msg = "missing field `steps` at line 10";
        assert_eq!(
            extract_between(msg, "missing field `", "`"),
            Some("steps".to_string())
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("duplicate action id 'id1'", "matrices[0].actions[2]")
            .with_suggestion("action ids must be unique within a matrix");
        let output = err.to_string();
        assert!(output.contains("matrices[0].actions[2]"));
        assert!(output.contains("must be unique"));
    }
}
