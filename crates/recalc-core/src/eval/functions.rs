//! Built-in function library and value coercions.

use super::EvalError;
use crate::value::{CellError, CellValue};

/// An evaluated function argument.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Arg {
    Scalar(CellValue),
    Range(Vec<CellValue>),
}

pub(super) fn to_number(value: &CellValue) -> Result<f64, CellError> {
    match value {
        CellValue::Number(n) => Ok(*n),
        CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Ok(0.0),
        CellValue::Text(s) => s.trim().parse::<f64>().map_err(|_| CellError::Value),
        CellValue::Error(e) => Err(*e),
    }
}

pub(super) fn to_bool(value: &CellValue) -> Result<bool, CellError> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Empty => Ok(false),
        CellValue::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        CellValue::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        CellValue::Text(_) => Err(CellError::Value),
        CellValue::Error(e) => Err(*e),
    }
}

pub(super) fn to_text(value: &CellValue) -> Result<String, CellError> {
    match value {
        CellValue::Error(e) => Err(*e),
        other => Ok(other.to_string()),
    }
}

/// Largest decimal exponent a finite f64 can carry.
const MAX_ROUND_DIGITS: f64 = 308.0;

/// Reject non-finite arithmetic results.
pub(super) fn finite(n: f64) -> Result<CellValue, EvalError> {
    if n.is_finite() {
        Ok(CellValue::Number(n))
    } else {
        Err(EvalError::Overflow)
    }
}

/// Numbers from arguments, aggregate style: scalars are coerced, ranges
/// contribute only their numeric cells.
fn numbers(args: &[Arg]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Scalar(v) => out.push(to_number(v)?),
            Arg::Range(values) => {
                for v in values {
                    match v {
                        CellValue::Number(n) => out.push(*n),
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

fn booleans(args: &[Arg]) -> Result<Vec<bool>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Scalar(v) => out.push(to_bool(v)?),
            Arg::Range(values) => {
                for v in values {
                    match v {
                        CellValue::Bool(b) => out.push(*b),
                        CellValue::Number(n) => out.push(*n != 0.0),
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

fn scalar(arg: &Arg) -> Result<&CellValue, CellError> {
    match arg {
        Arg::Scalar(v) => Ok(v),
        Arg::Range(_) => Err(CellError::Value),
    }
}

/// Unwrap a coercion, turning its error into the in-band result.
macro_rules! try_cell {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return Ok(CellValue::Error(e)),
        }
    };
}

/// Call a built-in by upper-cased name. Unknown names yield `#NAME?`.
pub(super) fn call(name: &str, args: &[Arg]) -> Result<CellValue, EvalError> {
    match name {
        "SUM" => finite(try_cell!(numbers(args)).iter().sum()),
        "PRODUCT" => {
            let nums = try_cell!(numbers(args));
            if nums.is_empty() {
                return Ok(CellValue::Number(0.0));
            }
            finite(nums.iter().product())
        }
        "AVERAGE" => {
            let nums = try_cell!(numbers(args));
            if nums.is_empty() {
                return Err(EvalError::DivisionByZero);
            }
            finite(nums.iter().sum::<f64>() / nums.len() as f64)
        }
        "MIN" => {
            let nums = try_cell!(numbers(args));
            Ok(CellValue::Number(nums.into_iter().reduce(f64::min).unwrap_or(0.0)))
        }
        "MAX" => {
            let nums = try_cell!(numbers(args));
            Ok(CellValue::Number(nums.into_iter().reduce(f64::max).unwrap_or(0.0)))
        }
        "COUNT" => {
            let count = args
                .iter()
                .map(|arg| match arg {
                    Arg::Scalar(v) => usize::from(to_number(v).is_ok() && !v.is_empty()),
                    Arg::Range(values) => values.iter().filter(|v| v.as_number().is_some()).count(),
                })
                .sum::<usize>();
            Ok(CellValue::Number(count as f64))
        }
        "COUNTA" => {
            let count = args
                .iter()
                .map(|arg| match arg {
                    Arg::Scalar(v) => usize::from(!v.is_empty()),
                    Arg::Range(values) => values.iter().filter(|v| !v.is_empty()).count(),
                })
                .sum::<usize>();
            Ok(CellValue::Number(count as f64))
        }
        "ABS" => {
            let [x] = args else {
                return Ok(CellError::Value.into());
            };
            let n = try_cell!(scalar(x).and_then(to_number));
            Ok(CellValue::Number(n.abs()))
        }
        "ROUND" => {
            let (x, digits) = match args {
                [x] => (x, None),
                [x, d] => (x, Some(d)),
                _ => return Ok(CellError::Value.into()),
            };
            let n = try_cell!(scalar(x).and_then(to_number));
            let digits = match digits {
                Some(d) => try_cell!(scalar(d).and_then(to_number))
                    .trunc()
                    .clamp(-MAX_ROUND_DIGITS, MAX_ROUND_DIGITS) as i32,
                None => 0,
            };
            if digits >= 0 {
                let factor = 10f64.powi(digits);
                let scaled = n * factor;
                if !scaled.is_finite() {
                    return Ok(CellValue::Number(n));
                }
                finite(scaled.round() / factor)
            } else {
                let factor = 10f64.powi(-digits);
                finite((n / factor).round() * factor)
            }
        }
        "AND" | "OR" => {
            let values = try_cell!(booleans(args));
            if values.is_empty() {
                return Ok(CellError::Value.into());
            }
            let result = if name == "AND" {
                values.iter().all(|b| *b)
            } else {
                values.iter().any(|b| *b)
            };
            Ok(CellValue::Bool(result))
        }
        "NOT" => {
            let [x] = args else {
                return Ok(CellError::Value.into());
            };
            Ok(CellValue::Bool(!try_cell!(scalar(x).and_then(to_bool))))
        }
        "CONCAT" | "CONCATENATE" => {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Arg::Scalar(v) => out.push_str(&try_cell!(to_text(v))),
                    Arg::Range(values) => {
                        for v in values {
                            out.push_str(&try_cell!(to_text(v)));
                        }
                    }
                }
            }
            Ok(CellValue::Text(out))
        }
        "LEN" | "UPPER" | "LOWER" => {
            let [x] = args else {
                return Ok(CellError::Value.into());
            };
            let text = try_cell!(scalar(x).and_then(to_text));
            Ok(match name {
                "LEN" => CellValue::Number(text.chars().count() as f64),
                "UPPER" => CellValue::Text(text.to_uppercase()),
                _ => CellValue::Text(text.to_lowercase()),
            })
        }
        _ => Ok(CellError::Name.into()),
    }
}
