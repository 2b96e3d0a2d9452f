// Formula Module
// Reference scanning, id rewriting, and evaluation of @{...} formulas

pub mod evaluator;
pub mod formula;
pub mod functions;
pub mod ids;
pub mod lexer;
pub mod parser;
pub mod scanner;

pub use evaluator::{EvalError, Evaluator, FormulaContext};
pub use formula::{CalcError, FormulaCalculator, MAX_FORMULA_ITERATIONS};
pub use functions::BuiltinFunctions;
pub use ids::IdSanitizer;
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, UnaryOp};
pub use scanner::{
    strip_literals, ActionReference, FormulaDelimiters, ReferenceScanner, ScanResult, ScanWarning,
    FORMULA_END, FORMULA_START,
};
