// Formula Lexer
// Tokenizes the body of an @{...} formula

use crate::expression::scanner::is_currency_symbol;

use std::fmt;

/// Token types for formula bodies
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Null,
    True,
    False,
    Number(f64),
    String(String),

    // Identifiers and references
    Identifier(String),

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Eq,       // ==
    Ne,       // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    And,      // &&
    Or,       // ||
    Not,      // !
    Dot,      // .
    Comma,    // ,
    Colon,    // :
    Question, // ?

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]

    // End of input
    Eof,
}

/// Operator and punctuation spellings, two-character forms first
const SYMBOLS: &[(&str, Token)] = &[
    ("==", Token::Eq),
    ("!=", Token::Ne),
    ("<=", Token::Le),
    (">=", Token::Ge),
    ("&&", Token::And),
    ("||", Token::Or),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("<", Token::Lt),
    (">", Token::Gt),
    ("!", Token::Not),
    (".", Token::Dot),
    (",", Token::Comma),
    (":", Token::Colon),
    ("?", Token::Question),
    ("(", Token::LParen),
    (")", Token::RParen),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
];

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Null => f.write_str("null"),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(name) => f.write_str(name),
            Token::Eof => f.write_str("end of formula"),
            symbol => {
                let spelling = SYMBOLS
                    .iter()
                    .find(|(_, token)| token == symbol)
                    .map_or("?", |(text, _)| *text);
                f.write_str(spelling)
            }
        }
    }
}

/// Lexer error
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    /// Character offset into the formula body
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at character {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

/// Lexer for formula bodies
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input; the last token is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        while self.current().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }

        let Some(ch) = self.current() else {
            return Ok(Token::Eof);
        };

        if ch == '\'' {
            return self.read_string();
        }
        if ch.is_ascii_digit() {
            return self.read_number();
        }
        // Parameter names may start with a currency sign
        if ch.is_alphabetic() || ch == '_' || is_currency_symbol(ch) {
            return Ok(self.read_identifier());
        }

        if let Some((text, token)) = SYMBOLS.iter().find(|(text, _)| self.at(text)) {
            self.pos += text.len();
            return Ok(token.clone());
        }

        let message = match ch {
            '=' => "expected '==' operator".to_string(),
            '&' => "expected '&&' operator".to_string(),
            '|' => "expected '||' operator".to_string(),
            _ => format!("unexpected character '{}'", ch),
        };
        Err(LexError {
            message,
            position: self.pos,
        })
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// True if the ASCII symbol `text` starts at the cursor
    fn at(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) {
        while self.current().is_some_and(&keep) {
            self.pos += 1;
        }
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();

        loop {
            match self.current() {
                // '' inside a literal is an escaped quote
                Some('\'') if self.chars.get(self.pos + 1) == Some(&'\'') => {
                    value.push('\'');
                    self.pos += 2;
                }
                Some('\'') => {
                    self.pos += 1;
                    return Ok(Token::String(value));
                }
                Some(ch) => {
                    value.push(ch);
                    self.pos += 1;
                }
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position: start,
                    })
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.take_while(|c| c.is_ascii_digit());

        // A '.' is a fraction only when a digit follows; otherwise it is member access
        let fraction = self.current() == Some('.')
            && self
                .chars
                .get(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit());
        if fraction {
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| LexError {
                message: format!("invalid number '{}'", text),
                position: start,
            })
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.pos;
        self.take_while(|c| c.is_alphanumeric() || c == '_' || is_currency_symbol(c));

        let ident: String = self.chars[start..self.pos].iter().collect();
        match ident.as_str() {
            "null" => Token::Null,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Identifier(ident),
        }
    }
}
