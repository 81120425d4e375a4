//! Value rules: type categories, lossless coercion, date-times and enumerations

use crate::reporter::DiagnosticKind;
use nexus_ir::{Array, ArrayData, Scalar, ScalarKind, Value};
use nexus_schema::EnumerationSpec;
use num_complex::Complex64;
use regex::Regex;
use std::sync::OnceLock;

/// Largest integer magnitude a float represents exactly
const EXACT_FLOAT_INT: u64 = 1 << 53;

/// Cached regex for the accepted ISO-8601 profile
static DATE_TIME_REGEX: OnceLock<Regex> = OnceLock::new();

fn date_time_regex() -> &'static Regex {
    DATE_TIME_REGEX.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$")
            .expect("Failed to compile date-time regex")
    })
}

/// Type categories a field or attribute can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NxType {
    Char,
    Int,
    PosInt,
    UInt,
    Float,
    /// Any integer or float
    Number,
    Complex,
    Boolean,
    Binary,
    DateTime,
    /// Unchecked (`NX_CHAR_OR_NUMBER`, unknown tokens)
    Any,
}

impl NxType {
    /// Category of a schema type token; undeclared types are character data
    pub fn from_token(token: Option<&str>) -> Self {
        match token.unwrap_or("NX_CHAR") {
            "NX_CHAR" => Self::Char,
            "NX_INT" => Self::Int,
            "NX_POSINT" => Self::PosInt,
            "NX_UINT" => Self::UInt,
            "NX_FLOAT" => Self::Float,
            "NX_NUMBER" => Self::Number,
            "NX_COMPLEX" => Self::Complex,
            "NX_BOOLEAN" => Self::Boolean,
            "NX_BINARY" => Self::Binary,
            "NX_DATE_TIME" | "ISO8601" => Self::DateTime,
            _ => Self::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Char => "character string",
            Self::Int => "signed integer",
            Self::PosInt => "positive integer",
            Self::UInt => "unsigned integer",
            Self::Float => "floating point",
            Self::Number => "number",
            Self::Complex => "complex",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::DateTime => "date-time",
            Self::Any => "any",
        }
    }
}

/// Outcome of checking one value against a type category
#[derive(Debug, Clone, PartialEq)]
pub enum Checked {
    Valid,
    /// Accepted after a lossless conversion; the template should store this value
    Coerced(Value),
    Invalid {
        kind: DiagnosticKind,
        detail: String,
    },
}

type ScalarCheck = Result<Option<Scalar>, (DiagnosticKind, String)>;

/// Check a value against a type category, coercing when lossless
pub fn check_value(value: &Value, ty: NxType) -> Checked {
    let outcome = match value {
        Value::Link(_) => return Checked::Valid,
        Value::Compressed { payload, strength } => {
            return match check_value(payload, ty) {
                Checked::Coerced(inner) => Checked::Coerced(Value::Compressed {
                    payload: Box::new(inner),
                    strength: *strength,
                }),
                other => other,
            };
        }
        Value::Scalar(s) => check_scalar(s, ty).map(|c| c.map(Value::Scalar)),
        Value::Array(a) => check_array(a, ty),
    };
    match outcome {
        Ok(None) => Checked::Valid,
        Ok(Some(coerced)) => Checked::Coerced(coerced),
        Err((kind, detail)) => Checked::Invalid { kind, detail },
    }
}

fn check_scalar(s: &Scalar, ty: NxType) -> ScalarCheck {
    match ty {
        NxType::Any => Ok(None),
        NxType::Char => accept_if(matches!(s, Scalar::Str(_)), s, ty),
        NxType::Binary => accept_if(matches!(s, Scalar::Bytes(_)), s, ty),
        NxType::Number => accept_if(
            matches!(s, Scalar::Int(_) | Scalar::UInt(_) | Scalar::Float(_)),
            s,
            ty,
        ),
        NxType::Int => keep_or(s, ScalarKind::Int, lossless_int(s).map(Scalar::Int), ty),
        NxType::UInt => keep_or(s, ScalarKind::UInt, lossless_uint(s).map(Scalar::UInt), ty),
        NxType::Float => keep_or(s, ScalarKind::Float, lossless_float(s).map(Scalar::Float), ty),
        NxType::Complex => keep_or(
            s,
            ScalarKind::Complex,
            lossless_float(s).map(|re| Scalar::Complex(Complex64::new(re, 0.0))),
            ty,
        ),
        NxType::Boolean => keep_or(s, ScalarKind::Bool, lossless_bool(s).map(Scalar::Bool), ty),
        NxType::PosInt => {
            let coerced = match s {
                Scalar::Int(_) | Scalar::UInt(_) => None,
                other => Some(Scalar::Int(lossless_int(other).ok_or_else(|| mismatch(s, ty))?)),
            };
            let positive = match coerced.as_ref().unwrap_or(s) {
                Scalar::Int(v) => *v > 0,
                Scalar::UInt(v) => *v > 0,
                _ => false,
            };
            if positive {
                Ok(coerced)
            } else {
                Err((
                    DiagnosticKind::TypeMismatch,
                    format!("{s} is not a strictly positive integer"),
                ))
            }
        }
        NxType::DateTime => match s {
            Scalar::Str(text) => validate_date_time(text)
                .map(|()| None)
                .map_err(|detail| (DiagnosticKind::DateFormat, detail)),
            other => Err(mismatch(other, ty)),
        },
    }
}

fn check_array(array: &Array, ty: NxType) -> Result<Option<Value>, (DiagnosticKind, String)> {
    if ty == NxType::Binary && matches!(array.kind(), ScalarKind::Int | ScalarKind::UInt) {
        return Ok(None);
    }
    let mut coerced = Vec::new();
    let mut any_coerced = false;
    for (index, scalar) in array.scalars().enumerate() {
        match check_scalar(&scalar, ty) {
            Ok(None) => coerced.push(scalar),
            Ok(Some(c)) => {
                any_coerced = true;
                coerced.push(c);
            }
            Err((kind, detail)) => return Err((kind, format!("element {index}: {detail}"))),
        }
    }
    if !any_coerced {
        return Ok(None);
    }
    array_data(coerced)
        .and_then(|data| Array::new(data, array.shape().to_vec()).ok())
        .map(|a| Some(Value::Array(a)))
        .ok_or_else(|| {
            (
                DiagnosticKind::TypeMismatch,
                format!("{} array cannot be stored as {}", array.kind(), ty.as_str()),
            )
        })
}

fn array_data(scalars: Vec<Scalar>) -> Option<ArrayData> {
    let kind = scalars.first().map_or(ScalarKind::Float, Scalar::kind);
    macro_rules! collect {
        ($variant:ident) => {
            scalars
                .into_iter()
                .map(|s| match s {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(ArrayData::$variant)
        };
    }
    match kind {
        ScalarKind::Int => collect!(Int),
        ScalarKind::UInt => collect!(UInt),
        ScalarKind::Float => collect!(Float),
        ScalarKind::Complex => collect!(Complex),
        ScalarKind::Bool => collect!(Bool),
        ScalarKind::Str => collect!(Str),
        ScalarKind::Bytes => None,
    }
}

fn accept_if(accepted: bool, s: &Scalar, ty: NxType) -> ScalarCheck {
    if accepted { Ok(None) } else { Err(mismatch(s, ty)) }
}

fn keep_or(s: &Scalar, kind: ScalarKind, converted: Option<Scalar>, ty: NxType) -> ScalarCheck {
    if s.kind() == kind {
        return Ok(None);
    }
    converted.map(Some).ok_or_else(|| mismatch(s, ty))
}

fn mismatch(s: &Scalar, ty: NxType) -> (DiagnosticKind, String) {
    let shown = match s {
        Scalar::Str(text) => format!("'{text}'"),
        other => other.to_string(),
    };
    (
        DiagnosticKind::TypeMismatch,
        format!("{} value {shown} is not a {}", s.kind(), ty.as_str()),
    )
}

fn lossless_int(s: &Scalar) -> Option<i64> {
    match s {
        Scalar::Int(v) => Some(*v),
        Scalar::UInt(v) => i64::try_from(*v).ok(),
        Scalar::Float(f)
            if f.is_finite() && f.fract() == 0.0 && f.abs() <= EXACT_FLOAT_INT as f64 =>
        {
            Some(*f as i64)
        }
        _ => None,
    }
}

fn lossless_uint(s: &Scalar) -> Option<u64> {
    match s {
        Scalar::UInt(v) => Some(*v),
        other => lossless_int(other).and_then(|v| u64::try_from(v).ok()),
    }
}

fn lossless_float(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Float(f) => Some(*f),
        Scalar::Int(v) if v.unsigned_abs() <= EXACT_FLOAT_INT => Some(*v as f64),
        Scalar::UInt(v) if *v <= EXACT_FLOAT_INT => Some(*v as f64),
        _ => None,
    }
}

/// Spelled-out booleans, any case
fn lossless_bool(s: &Scalar) -> Option<bool> {
    match s {
        Scalar::Bool(b) => Some(*b),
        Scalar::Str(text) if text.eq_ignore_ascii_case("true") => Some(true),
        Scalar::Str(text) if text.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Check the `YYYY-MM-DDThh:mm:ss[.fraction](Z|±hh:mm)` profile.
///
/// # Errors
///
/// Returns a description when the text does not match, names an impossible
/// date, or uses the `-00:00` unknown-offset marker.
pub fn validate_date_time(text: &str) -> Result<(), String> {
    if !date_time_regex().is_match(text) {
        return Err(format!(
            "'{text}' does not match YYYY-MM-DDThh:mm:ss[.fraction](Z|+hh:mm|-hh:mm)"
        ));
    }
    if text.ends_with("-00:00") {
        return Err(format!("'{text}' uses the offset -00:00"));
    }
    chrono::DateTime::parse_from_rfc3339(text)
        .map(|_| ())
        .map_err(|e| format!("'{text}' is not a valid date-time: {e}"))
}

/// Literals of `value` that are not members of the enumeration
pub fn check_enumeration(value: &Value, spec: &EnumerationSpec) -> Vec<String> {
    let literals: Vec<String> = match value.payload() {
        Value::Scalar(s) => vec![s.to_string()],
        Value::Array(a) => a.scalars().map(|s| s.to_string()).collect(),
        Value::Link(_) | Value::Compressed { .. } => Vec::new(),
    };
    literals
        .into_iter()
        .filter(|literal| !spec.contains(literal))
        .collect()
}
