// Built-in Functions for Matrix Formulas
// Arithmetic with decimal scale, string shaping, logic, and date helpers

use crate::expression::evaluator::{values_equal, EvalError};
use crate::model::value::format_number;
use crate::model::Value;

use chrono::{DateTime, Duration, Months, NaiveTime, Utc};

/// Scale applied by add/sub/mul/div when none is given
pub const DEFAULT_SCALE: i64 = 5;

/// Line separator returned by eol()
pub const EOL: &str = "\r\n";

/// Longest string a padding function may produce
pub const MAX_TEXT_LENGTH: usize = 1 << 20;

/// Registry of built-in functions
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function. Names are matched case-insensitively.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // Arithmetic
            "add" => self.fn_arith(args, "add", |a, b| Ok(a + b)),
            "sub" => self.fn_arith(args, "sub", |a, b| Ok(a - b)),
            "mul" => self.fn_arith(args, "mul", |a, b| Ok(a * b)),
            "div" => self.fn_arith(args, "div", |a, b| {
                if b == 0.0 {
                    Err(EvalError::new("div(): division by zero"))
                } else {
                    Ok(a / b)
                }
            }),
            "round" => self.fn_round(args, "round", Rounding::HalfUp),
            "roundup" => self.fn_round(args, "roundUp", Rounding::Up),
            "rounddown" => self.fn_round(args, "roundDown", Rounding::Down),
            "min" => self.fn_min_max(args, "min", f64::min),
            "max" => self.fn_min_max(args, "max", f64::max),
            "abs" => {
                self.require_args(&args, 1, "abs")?;
                Ok(Value::Number(number_arg(&args, 0, "abs")?.abs()))
            }
            "toint" => self.fn_to_int(args),
            "asnumber" => {
                self.require_args(&args, 1, "asNumber")?;
                Ok(Value::Number(number_arg(&args, 0, "asNumber")?))
            }

            // Strings
            "trim" => {
                self.require_args(&args, 1, "trim")?;
                Ok(Value::String(args[0].as_string().trim().to_string()))
            }
            "trimleft" => self.fn_trim_left(args),
            "trimright" => self.fn_trim_right(args),
            "upper" => {
                self.require_args(&args, 1, "upper")?;
                Ok(Value::String(args[0].as_string().to_uppercase()))
            }
            "lower" => {
                self.require_args(&args, 1, "lower")?;
                Ok(Value::String(args[0].as_string().to_lowercase()))
            }
            "length" => self.fn_length(args),
            "substring" => self.fn_substring(args),
            "contains" => self.fn_string_test(args, "contains", |s, p| s.contains(p)),
            "startswith" => self.fn_string_test(args, "startsWith", |s, p| s.starts_with(p)),
            "endswith" => self.fn_string_test(args, "endsWith", |s, p| s.ends_with(p)),
            "replace" => {
                self.require_args(&args, 3, "replace")?;
                let s = args[0].as_string();
                Ok(Value::String(
                    s.replace(&args[1].as_string(), &args[2].as_string()),
                ))
            }
            "split" => self.fn_split(args),
            "join" => self.fn_join(args),
            "concat" => Ok(Value::String(
                args.iter().map(Value::as_string).collect::<String>(),
            )),
            "addzeros" => self.fn_add_zeros(args),
            "trimzeros" => {
                self.require_args(&args, 1, "trimZeros")?;
                Ok(Value::String(trim_zeros(&args[0].as_string())))
            }
            "append" => self.fn_pad(args, "append", false),
            "prepend" => self.fn_pad(args, "prepend", true),
            "tostring" => {
                self.require_args(&args, 1, "toString")?;
                Ok(Value::String(args[0].as_string()))
            }
            "equals" => {
                self.require_args(&args, 2, "equals")?;
                Ok(Value::Bool(args[0].as_string() == args[1].as_string()))
            }
            "isempty" => {
                self.require_args(&args, 1, "isEmpty")?;
                Ok(Value::Bool(args[0].as_string().is_empty()))
            }

            // Logic
            "iif" => {
                self.require_args(&args, 3, "iif")?;
                let mut args = args;
                let else_val = args.pop().unwrap_or_default();
                let then_val = args.pop().unwrap_or_default();
                Ok(if args[0].is_truthy() { then_val } else { else_val })
            }
            "coalesce" => Ok(args
                .into_iter()
                .find(|arg| !matches!(arg, Value::Null) && !arg.as_string().is_empty())
                .unwrap_or(Value::Null)),
            "eq" => {
                self.require_args(&args, 2, "eq")?;
                Ok(Value::Bool(values_equal(&args[0], &args[1])))
            }
            "ne" => {
                self.require_args(&args, 2, "ne")?;
                Ok(Value::Bool(!values_equal(&args[0], &args[1])))
            }
            "not" => {
                self.require_args(&args, 1, "not")?;
                Ok(Value::Bool(!args[0].is_truthy()))
            }

            // Misc
            "uuid" => {
                self.require_args(&args, 0, "uuid")?;
                Ok(Value::String(uuid::Uuid::new_v4().to_string()))
            }
            "eol" => {
                self.require_args(&args, 0, "eol")?;
                Ok(Value::String(EOL.to_string()))
            }
            "time" => self.fn_time(args),
            "format" => self.fn_format(args),
            "pattern" => {
                self.require_args(&args, 1, "pattern")?;
                Ok(Value::String(args[0].as_string()))
            }

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    // =========================================================================
    // Arithmetic Functions
    // =========================================================================

    fn fn_arith<F>(&self, args: Vec<Value>, name: &str, op: F) -> Result<Value, EvalError>
    where
        F: FnOnce(f64, f64) -> Result<f64, EvalError>,
    {
        self.require_args_between(&args, 2, 3, name)?;
        let a = number_arg(&args, 0, name)?;
        let b = number_arg(&args, 1, name)?;
        let scale = match args.get(2) {
            Some(_) => int_arg(&args, 2, name)?,
            None => DEFAULT_SCALE,
        };

        let result = op(a, b)?;
        if scale < 0 {
            return Ok(Value::String(format_number(result)));
        }
        Ok(Value::String(round_decimal(result, scale as usize, Rounding::HalfUp)))
    }

    fn fn_round(&self, args: Vec<Value>, name: &str, mode: Rounding) -> Result<Value, EvalError> {
        self.require_args_between(&args, 1, 2, name)?;
        let n = number_arg(&args, 0, name)?;
        let scale = match args.get(1) {
            Some(_) => int_arg(&args, 1, name)?,
            None => 0,
        };
        if scale < 0 {
            return Err(EvalError::new(format!("{}(): scale must not be negative", name)));
        }
        Ok(Value::String(round_decimal(n, scale as usize, mode)))
    }

    fn fn_min_max(
        &self,
        args: Vec<Value>,
        name: &str,
        pick: fn(f64, f64) -> f64,
    ) -> Result<Value, EvalError> {
        if args.is_empty() {
            return Err(EvalError::new(format!(
                "{}() requires at least 1 argument",
                name
            )));
        }

        let mut result = number_arg(&args, 0, name)?;
        for i in 1..args.len() {
            result = pick(result, number_arg(&args, i, name)?);
        }
        Ok(Value::Number(result))
    }

    fn fn_to_int(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "toInt")?;
        let text = args[0].as_string();
        text.trim()
            .parse::<i64>()
            .map(|n| Value::Number(n as f64))
            .map_err(|_| EvalError::new(format!("toInt(): '{}' is not an integer", text)))
    }

    // =========================================================================
    // String Functions
    // =========================================================================

    /// Keep the first `length` characters
    fn fn_trim_left(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "trimLeft")?;
        let s = args[0].as_string();
        let length = int_arg(&args, 1, "trimLeft")?.max(0) as usize;
        Ok(Value::String(s.chars().take(length).collect()))
    }

    /// Keep the last `length` characters
    fn fn_trim_right(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "trimRight")?;
        let s = args[0].as_string();
        let length = int_arg(&args, 1, "trimRight")?.max(0) as usize;
        let count = s.chars().count();
        Ok(Value::String(
            s.chars().skip(count.saturating_sub(length)).collect(),
        ))
    }

    fn fn_length(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "length")?;
        let len = match &args[0] {
            Value::Array(arr) => arr.len(),
            Value::Object(obj) => obj.len(),
            other => other.as_string().chars().count(),
        };
        Ok(Value::Number(len as f64))
    }

    fn fn_substring(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args_between(&args, 2, 3, "substring")?;
        let chars: Vec<char> = args[0].as_string().chars().collect();
        let start = int_arg(&args, 1, "substring")?;
        let end = match args.get(2) {
            Some(_) => int_arg(&args, 2, "substring")?,
            None => chars.len() as i64,
        };

        if start < 0 || end < start || end as usize > chars.len() {
            return Err(EvalError::new(format!(
                "substring(): range {}..{} out of bounds for length {}",
                start,
                end,
                chars.len()
            )));
        }
        Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
    }

    fn fn_string_test(
        &self,
        args: Vec<Value>,
        name: &str,
        test: fn(&str, &str) -> bool,
    ) -> Result<Value, EvalError> {
        self.require_args(&args, 2, name)?;
        Ok(Value::Bool(test(&args[0].as_string(), &args[1].as_string())))
    }

    fn fn_split(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "split")?;
        let s = args[0].as_string();
        let delimiter = args[1].as_string();
        if delimiter.is_empty() {
            return Ok(Value::Array(
                s.chars().map(|c| Value::String(c.to_string())).collect(),
            ));
        }
        let parts: Vec<Value> = s
            .split(delimiter.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect();
        Ok(Value::Array(parts))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "join")?;

        let separator = args[1].as_string();

        match &args[0] {
            Value::Array(arr) => {
                let strings: Vec<String> = arr.iter().map(|v| v.as_string()).collect();
                Ok(Value::String(strings.join(&separator)))
            }
            other => Ok(Value::String(other.as_string())),
        }
    }

    /// Pad the fractional part to `zeros` digits, adding the delimiter if
    /// there is none
    fn fn_add_zeros(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args_between(&args, 1, 3, "addZeros")?;
        let mut value = args[0].as_string();
        let mut zeros = match args.get(1) {
            Some(_) => int_arg(&args, 1, "addZeros")?,
            None => 0,
        };
        let delim = args
            .get(2)
            .map(Value::as_string)
            .unwrap_or_else(|| ".".to_string());

        if zeros <= 0 {
            return Ok(Value::String(value));
        }

        match value.find(&delim) {
            Some(point) => {
                let digits = value[point + delim.len()..].chars().count() as i64;
                zeros -= digits;
            }
            None => value.push_str(&delim),
        }
        let padding = fill_text('0', zeros.max(0) as usize, value.chars().count(), "addZeros")?;
        value.push_str(&padding);
        Ok(Value::String(value))
    }

    fn fn_pad(&self, args: Vec<Value>, name: &str, front: bool) -> Result<Value, EvalError> {
        self.require_args(&args, 3, name)?;
        let value = args[0].as_string();
        let fill = args[1].as_string().chars().next().ok_or_else(|| {
            EvalError::new(format!("{}(): padding character must not be empty", name))
        })?;
        let length = int_arg(&args, 2, name)?.max(0) as usize;

        let current = value.chars().count();
        let padding = fill_text(fill, length.saturating_sub(current), current, name)?;
        Ok(Value::String(if front {
            padding + &value
        } else {
            value + &padding
        }))
    }

    // =========================================================================
    // Date and Time Functions
    // =========================================================================

    /// time(days[, months[, years[, hours]]]): epoch millis of today's UTC
    /// midnight shifted by the given amounts
    fn fn_time(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args_between(&args, 1, 4, "time")?;
        let mut shifts = [0i64; 4];
        for (i, shift) in shifts.iter_mut().enumerate().take(args.len()) {
            *shift = int_arg(&args, i, "time")?;
        }
        let [days, months, years, hours] = shifts;

        let midnight = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let total_months = months + years * 12;
        let shifted = if total_months >= 0 {
            midnight.checked_add_months(Months::new(total_months as u32))
        } else {
            midnight.checked_sub_months(Months::new(total_months.unsigned_abs() as u32))
        }
        .and_then(|t| t.checked_add_signed(Duration::days(days)))
        .and_then(|t| t.checked_add_signed(Duration::hours(hours)))
        .ok_or_else(|| EvalError::new("time(): shifted date is out of range"))?;

        Ok(Value::Number(shifted.timestamp_millis() as f64))
    }

    /// format(millis, pattern) with a yyyy/MM/dd HH:mm:ss.SSS style pattern
    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "format")?;
        let millis = number_arg(&args, 0, "format")? as i64;
        let pattern = args[1].as_string();

        let time = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| EvalError::new(format!("format(): invalid time {}", millis)))?;
        let chrono_pattern = convert_date_pattern(&pattern);
        Ok(Value::String(time.format(&chrono_pattern).to_string()))
    }

    // =========================================================================
    // Helper Functions
    // =========================================================================

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }

    fn require_args_between(
        &self,
        args: &[Value],
        min: usize,
        max: usize,
        name: &str,
    ) -> Result<(), EvalError> {
        if args.len() < min || args.len() > max {
            return Err(EvalError::new(format!(
                "{}() requires {} to {} arguments, got {}",
                name,
                min,
                max,
                args.len()
            )));
        }
        Ok(())
    }
}

fn number_arg(args: &[Value], index: usize, name: &str) -> Result<f64, EvalError> {
    args[index].as_number().ok_or_else(|| {
        EvalError::new(format!(
            "{}(): argument {} ('{}') is not a number",
            name,
            index + 1,
            args[index].as_string()
        ))
    })
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64, EvalError> {
    let n = number_arg(args, index, name)?;
    if n.fract() != 0.0 {
        return Err(EvalError::new(format!(
            "{}(): argument {} must be an integer",
            name,
            index + 1
        )));
    }
    Ok(n as i64)
}

/// `count` copies of `fill`, refusing results longer than
/// `MAX_TEXT_LENGTH` characters once appended to `existing` characters
fn fill_text(fill: char, count: usize, existing: usize, name: &str) -> Result<String, EvalError> {
    if existing.saturating_add(count) > MAX_TEXT_LENGTH {
        return Err(EvalError::new(format!(
            "{}(): result would exceed {} characters",
            name, MAX_TEXT_LENGTH
        )));
    }

    let mut text = String::new();
    text.try_reserve(count.saturating_mul(fill.len_utf8()))
        .map_err(|e| EvalError::new(format!("{}(): {}", name, e)))?;
    text.extend(std::iter::repeat(fill).take(count));
    Ok(text)
}

/// Decimal rounding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Half away from zero
    HalfUp,
    /// Away from zero
    Up,
    /// Toward zero
    Down,
}

/// Round `n` to `scale` fractional digits on its shortest decimal form and
/// render it without trailing zeros
pub fn round_decimal(n: f64, scale: usize, mode: Rounding) -> String {
    if !n.is_finite() {
        return n.to_string();
    }

    let text = format!("{}", n.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, ""));

    let (kept, dropped) = if frac_part.len() > scale {
        frac_part.split_at(scale)
    } else {
        (frac_part, "")
    };

    let round_away = match mode {
        Rounding::HalfUp => dropped.as_bytes().first().is_some_and(|&d| d >= b'5'),
        Rounding::Up => dropped.bytes().any(|d| d != b'0'),
        Rounding::Down => false,
    };

    let mut digits: Vec<u8> = int_part.bytes().chain(kept.bytes()).collect();
    if round_away {
        let mut i = digits.len();
        loop {
            if i == 0 {
                digits.insert(0, b'1');
                break;
            }
            i -= 1;
            if digits[i] == b'9' {
                digits[i] = b'0';
            } else {
                digits[i] += 1;
                break;
            }
        }
    }

    let split = digits.len() - kept.len();
    let int_digits = String::from_utf8_lossy(&digits[..split]).into_owned();
    let frac_digits = String::from_utf8_lossy(&digits[split..]).into_owned();
    let frac_digits = frac_digits.trim_end_matches('0');

    let mut result = if frac_digits.is_empty() {
        int_digits
    } else {
        format!("{}.{}", int_digits, frac_digits)
    };
    if n < 0.0 && result.bytes().any(|d| d.is_ascii_digit() && d != b'0') {
        result.insert(0, '-');
    }
    result
}

/// Remove trailing fractional zeros and a dangling point
pub fn trim_zeros(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Translate a yyyy/MM/dd HH:mm:ss.SSS style date pattern into chrono's
/// strftime syntax. Text in single quotes is copied literally.
pub fn convert_date_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '\'' {
            let close = chars[i + 1..].iter().position(|&c| c == '\'');
            match close {
                Some(0) => {
                    out.push('\'');
                    i += 2;
                }
                Some(offset) => {
                    for &c in &chars[i + 1..i + 1 + offset] {
                        push_literal(&mut out, c);
                    }
                    i += offset + 2;
                }
                None => {
                    for &c in &chars[i + 1..] {
                        push_literal(&mut out, c);
                    }
                    i = chars.len();
                }
            }
            continue;
        }

        let run = chars[i..].iter().take_while(|&&c| c == ch).count();
        let directive = match (ch, run) {
            ('y', 2) => Some("%y"),
            ('y', _) => Some("%Y"),
            ('M', 1) => Some("%-m"),
            ('M', 2) => Some("%m"),
            ('M', 3) => Some("%b"),
            ('M', _) => Some("%B"),
            ('d', 1) => Some("%-d"),
            ('d', _) => Some("%d"),
            ('H', 1) => Some("%-H"),
            ('H', _) => Some("%H"),
            ('h', 1) => Some("%-I"),
            ('h', _) => Some("%I"),
            ('m', 1) => Some("%-M"),
            ('m', _) => Some("%M"),
            ('s', 1) => Some("%-S"),
            ('s', _) => Some("%S"),
            ('S', _) => Some("%3f"),
            ('a', _) => Some("%p"),
            ('E', 1..=3) => Some("%a"),
            ('E', _) => Some("%A"),
            _ => None,
        };

        match directive {
            Some(directive) => out.push_str(directive),
            None => {
                for _ in 0..run {
                    push_literal(&mut out, ch);
                }
            }
        }
        i += run;
    }

    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluator::{Evaluator, FormulaContext};

    fn eval(expr: &str) -> Value {
        let ctx = FormulaContext::default();
        Evaluator::new(&ctx).evaluate_str(expr).unwrap()
    }

    fn eval_str(expr: &str) -> String {
        eval(expr).as_string()
    }

    // =========================================================================
    // Arithmetic Functions
    // =========================================================================

    #[test]
    fn test_add_sub_default_scale() {
        assert_eq!(eval_str("add('0.1', '0.2')"), "0.3");
        assert_eq!(eval_str("add('1', '2')"), "3");
        assert_eq!(eval_str("sub('5.50', '0.25')"), "5.25");
        assert_eq!(eval_str("add('1.123456', '0')"), "1.12346");
    }

    #[test]
    fn test_mul_div_with_scale() {
        assert_eq!(eval_str("mul('2.5', '3', 0)"), "8");
        assert_eq!(eval_str("div('1', '3')"), "0.33333");
        assert_eq!(eval_str("div('2', '3', 2)"), "0.67");
    }

    #[test]
    fn test_div_by_zero() {
        let ctx = FormulaContext::default();
        assert!(Evaluator::new(&ctx).evaluate_str("div(1, 0)").is_err());
    }

    #[test]
    fn test_round_modes() {
        assert_eq!(eval_str("round('1.555', 2)"), "1.56");
        assert_eq!(eval_str("round('2.675', 2)"), "2.68");
        assert_eq!(eval_str("round('-1.5')"), "-2");
        assert_eq!(eval_str("roundUp('1.001', 2)"), "1.01");
        assert_eq!(eval_str("roundDown('1.999', 2)"), "1.99");
        assert_eq!(eval_str("round('9.995', 2)"), "10");
    }

    #[test]
    fn test_min_max_abs() {
        assert_eq!(eval("min(3, '1', 2)"), Value::Number(1.0));
        assert_eq!(eval("max(3, '10')"), Value::Number(10.0));
        assert_eq!(eval("abs(-4)"), Value::Number(4.0));
    }

    #[test]
    fn test_to_int_and_as_number() {
        assert_eq!(eval("toInt('42')"), Value::Number(42.0));
        assert_eq!(eval("asNumber('1.50')"), Value::Number(1.5));

        let ctx = FormulaContext::default();
        assert!(Evaluator::new(&ctx).evaluate_str("toInt('4.2')").is_err());
    }

    // =========================================================================
    // String Functions
    // =========================================================================

    #[test]
    fn test_trim_left_right() {
        assert_eq!(eval_str("trimLeft('abcdef', 3)"), "abc");
        assert_eq!(eval_str("trimRight('abcdef', 2)"), "ef");
        assert_eq!(eval_str("trimLeft('ab', 5)"), "ab");
    }

    #[test]
    fn test_add_zeros() {
        assert_eq!(eval_str("addZeros('123', 3)"), "123.000");
        assert_eq!(eval_str("addZeros('1.5', 3)"), "1.500");
        assert_eq!(eval_str("addZeros('1,5', 2, ',')"), "1,50");
        assert_eq!(eval_str("addZeros('1.2345', 2)"), "1.2345");
    }

    #[test]
    fn test_trim_zeros() {
        assert_eq!(eval_str("trimZeros('123.000')"), "123");
        assert_eq!(eval_str("trimZeros('1.2300')"), "1.23");
        assert_eq!(eval_str("trimZeros('1200')"), "1200");
    }

    #[test]
    fn test_append_prepend() {
        assert_eq!(eval_str("append('12345', 'X', 8)"), "12345XXX");
        assert_eq!(eval_str("prepend('42', '0', 5)"), "00042");
        assert_eq!(eval_str("prepend('123456', '0', 3)"), "123456");
    }

    #[test]
    fn test_padding_length_is_bounded() {
        let ctx = FormulaContext::default();
        let evaluator = Evaluator::new(&ctx);

        let err = evaluator
            .evaluate_str("prepend('1', '0', 1000000000000000)")
            .unwrap_err();
        assert!(err.message.contains("prepend(): result would exceed"));
        assert!(evaluator.evaluate_str("append('1', 'x', 1000000000000000)").is_err());
        assert!(evaluator.evaluate_str("addZeros('1', 1000000000000000)").is_err());

        let longest = format!("append('', 'x', {})", MAX_TEXT_LENGTH);
        assert_eq!(
            evaluator.evaluate_str(&longest).unwrap().as_string().len(),
            MAX_TEXT_LENGTH
        );
        // Lengths beyond the input only keep what is there
        assert_eq!(eval_str("trimLeft('ab', 1000000000000000)"), "ab");
        assert_eq!(eval_str("trimRight('ab', 1000000000000000)"), "ab");
        assert!(evaluator.evaluate_str("substring('ab', 0, 1000000000000000)").is_err());
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(eval_str("substring('abcdef', 1, 3)"), "bc");
        assert_eq!(eval_str("replace('a-b-c', '-', '+')"), "a+b+c");
        assert_eq!(eval_str("concat('a', 1, true)"), "a1true");
        assert_eq!(eval_str("join(split('a,b', ','), ';')"), "a;b");
        assert_eq!(eval("length('héllo')"), Value::Number(5.0));
        assert_eq!(eval("'APKE'.equals('ECLR')"), Value::Bool(false));
        assert_eq!(eval("isEmpty('')"), Value::Bool(true));
        assert_eq!(eval("startsWith('abc', 'ab')"), Value::Bool(true));
    }

    #[test]
    fn test_case_insensitive_names() {
        assert_eq!(eval_str("UPPER('abc')"), "ABC");
        assert_eq!(eval_str("TrimZeros('1.0')"), "1");
    }

    // =========================================================================
    // Logic and Misc Functions
    // =========================================================================

    #[test]
    fn test_logic_functions() {
        assert_eq!(eval("coalesce(null, '', 'x')"), Value::from("x"));
        assert_eq!(eval("eq('1', 1)"), Value::Bool(true));
        assert_eq!(eval("ne('a', 'A')"), Value::Bool(true));
        assert_eq!(eval("not(false)"), Value::Bool(true));
    }

    #[test]
    fn test_misc_functions() {
        assert_eq!(eval_str("eol()"), "\r\n");
        assert_eq!(eval_str("pattern('AB*')"), "AB*");
        assert_eq!(eval_str("uuid()").len(), 36);
    }

    #[test]
    fn test_time_is_midnight_millis() {
        let Value::Number(millis) = eval("time(0)") else {
            panic!("expected number");
        };
        assert_eq!(millis as i64 % 86_400_000, 0);

        let Value::Number(tomorrow) = eval("time(1)") else {
            panic!("expected number");
        };
        assert_eq!((tomorrow - millis) as i64, 86_400_000);
    }

    #[test]
    fn test_format_epoch_millis() {
        assert_eq!(
            eval_str("format(1545264000123, 'yyyy/MM/dd HH:mm:ss.SSS')"),
            "2018/12/20 00:00:00.123"
        );
        assert_eq!(eval_str("format(0, 'dd-MM-yy')"), "01-01-70");
        assert_eq!(eval_str("format(0, '''Day'' d')"), "Day 1");
    }

    #[test]
    fn test_unknown_function() {
        let ctx = FormulaContext::default();
        let err = Evaluator::new(&ctx).evaluate_str("nosuch(1)").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn test_convert_date_pattern() {
        assert_eq!(convert_date_pattern("yyyyMMdd"), "%Y%m%d");
        assert_eq!(convert_date_pattern("HH:mm 'at' %"), "%H:%M at %%");
    }
}
