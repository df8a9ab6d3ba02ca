//! Cell values and contents.
//!
//! [`CellValue`] is what a computation produces; [`CellContent`] is what a
//! grid slot holds before evaluation (a literal or formula text).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// In-band error markers produced by evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellError {
    /// Generic failure: syntax errors and evaluator faults.
    Error,
    /// Unknown function name.
    Name,
    /// Wrong operand type.
    Value,
    /// Reference that does not resolve.
    Ref,
    /// Circular reference.
    Cycle,
}

impl CellError {
    pub fn code(self) -> &'static str {
        match self {
            CellError::Error => "#ERROR!",
            CellError::Name => "#NAME?",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Cycle => "#CYCLE!",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "#ERROR!" => Some(CellError::Error),
            "#NAME?" => Some(CellError::Name),
            "#VALUE!" => Some(CellError::Value),
            "#REF!" => Some(CellError::Ref),
            "#CYCLE!" => Some(CellError::Cycle),
            _ => None,
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A computed scalar, or an in-band error.
///
/// JSON form: `null`, a number, a string, a boolean, or the error code
/// string (e.g. `"#ERROR!"`).
///
/// Errors and text share the string form, so decoding is lossy: a text
/// value spelled exactly like an error code (`"#REF!"`) comes back as that
/// error. Store such text as a formula (`="#REF!"`) to keep it text.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Error(CellError),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}

/// Render a number the way a grid shows it: integral values without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::Error(e) => f.write_str(e.code()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Empty => serializer.serialize_none(),
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Error(e) => serializer.serialize_str(e.code()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<RawScalar>::deserialize(deserializer)? {
            None => CellValue::Empty,
            Some(RawScalar::Bool(b)) => CellValue::Bool(b),
            Some(RawScalar::Number(n)) => CellValue::Number(n),
            Some(RawScalar::Text(s)) => match CellError::from_code(&s) {
                Some(e) => CellValue::Error(e),
                None => CellValue::Text(s),
            },
        })
    }
}

/// What a grid slot holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellContent {
    #[default]
    Empty,
    /// A literal value.
    Value(CellValue),
    /// Formula source, including the leading `=`.
    Formula(String),
}

impl CellContent {
    /// Classify text typed into a cell.
    ///
    /// A leading `=` makes a formula; otherwise numbers, `TRUE`/`FALSE`
    /// and empty input are recognised, and anything else is text.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return CellContent::Empty;
        }
        if trimmed.starts_with('=') {
            return CellContent::Formula(trimmed.to_string());
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return CellContent::Value(CellValue::Number(n));
            }
        }
        if trimmed.eq_ignore_ascii_case("TRUE") {
            return CellContent::Value(CellValue::Bool(true));
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return CellContent::Value(CellValue::Bool(false));
        }
        CellContent::Value(CellValue::Text(input.to_string()))
    }

    /// Build contents from a stored record's value/formula pair.
    ///
    /// Formula text wins over the value. Stored formulas may omit the `=`.
    pub fn from_parts(value: &CellValue, formula: Option<&str>) -> Self {
        match formula.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) if f.starts_with('=') => CellContent::Formula(f.to_string()),
            Some(f) => CellContent::Formula(format!("={}", f)),
            None if value.is_empty() => CellContent::Empty,
            None => CellContent::Value(value.clone()),
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellContent::Formula(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_classification() {
        assert_eq!(CellContent::from_input(""), CellContent::Empty);
        assert_eq!(
            CellContent::from_input("=A1+1"),
            CellContent::Formula("=A1+1".to_string())
        );
        assert_eq!(
            CellContent::from_input("42.5"),
            CellContent::Value(CellValue::Number(42.5))
        );
        assert_eq!(
            CellContent::from_input("true"),
            CellContent::Value(CellValue::Bool(true))
        );
        assert_eq!(
            CellContent::from_input("hello"),
            CellContent::Value(CellValue::Text("hello".to_string()))
        );
        assert_eq!(
            CellContent::from_input("inf"),
            CellContent::Value(CellValue::Text("inf".to_string()))
        );
    }

    #[test]
    fn test_from_parts_prefers_formula() {
        let value = CellValue::Number(3.0);
        assert_eq!(
            CellContent::from_parts(&value, Some("SUM(A1:A2)")),
            CellContent::Formula("=SUM(A1:A2)".to_string())
        );
        assert_eq!(
            CellContent::from_parts(&value, None),
            CellContent::Value(CellValue::Number(3.0))
        );
        assert_eq!(
            CellContent::from_parts(&CellValue::Empty, Some("  ")),
            CellContent::Empty
        );
    }

    #[test]
    fn test_value_json_shapes() {
        assert_eq!(serde_json::to_string(&CellValue::Number(60.0)).unwrap(), "60.0");
        assert_eq!(serde_json::to_string(&CellValue::Empty).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&CellValue::Error(CellError::Error)).unwrap(),
            "\"#ERROR!\""
        );

        let parsed: Vec<CellValue> =
            serde_json::from_str(r##"[null, 4, "x", true, "#CYCLE!"]"##).unwrap();
        assert_eq!(
            parsed,
            vec![
                CellValue::Empty,
                CellValue::Number(4.0),
                CellValue::Text("x".to_string()),
                CellValue::Bool(true),
                CellValue::Error(CellError::Cycle),
            ]
        );
    }

    #[test]
    fn test_error_spelled_text_decodes_as_error() {
        let text = CellValue::Text("#REF!".to_string());
        let json = serde_json::to_string(&text).unwrap();
        let decoded: CellValue = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, CellValue::Error(CellError::Ref));

        let decoded: CellValue = serde_json::from_str(r##""#ref!""##).unwrap();
        assert_eq!(decoded, CellValue::Text("#ref!".to_string()));
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Number(4.0).to_string(), "4");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");
        assert_eq!(CellValue::Bool(false).to_string(), "FALSE");
        assert_eq!(CellValue::Error(CellError::Name).to_string(), "#NAME?");
    }
}
