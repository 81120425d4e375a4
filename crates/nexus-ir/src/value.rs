//! Values that readers place into template slots
//!
//! Dispatch happens on the tag: a scalar, a homogeneous n-dimensional array, a
//! compression request wrapping one of those, or a link to another node.

use crate::{Error, Result};
use num_complex::Complex64;
use serde_json::{Map, Number, Value as JsonValue, json};
use std::fmt;

/// Primitive kinds, used for diagnostics and array homogeneity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    UInt,
    Float,
    Complex,
    Bool,
    Str,
    Bytes,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Complex => "complex",
            Self::Bool => "bool",
            Self::Str => "string",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single primitive value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex(Complex64),
    Bool(bool),
    /// Character data, including ISO-8601 date strings
    Str(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Int(_) => ScalarKind::Int,
            Self::UInt(_) => ScalarKind::UInt,
            Self::Float(_) => ScalarKind::Float,
            Self::Complex(_) => ScalarKind::Complex,
            Self::Bool(_) => ScalarKind::Bool,
            Self::Str(_) => ScalarKind::Str,
            Self::Bytes(_) => ScalarKind::Bytes,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(v) => json!(v),
            Self::UInt(v) => json!(v),
            Self::Float(v) => float_json(*v),
            Self::Complex(c) => json!({"re": float_json(c.re), "im": float_json(c.im)}),
            Self::Bool(v) => json!(v),
            Self::Str(s) => json!(s),
            Self::Bytes(b) => json!(b),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Complex(c) => write!(f, "{c}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Flat element storage of an [`Array`]
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Complex(Vec<Complex64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::UInt(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Complex(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Int(_) => ScalarKind::Int,
            Self::UInt(_) => ScalarKind::UInt,
            Self::Float(_) => ScalarKind::Float,
            Self::Complex(_) => ScalarKind::Complex,
            Self::Bool(_) => ScalarKind::Bool,
            Self::Str(_) => ScalarKind::Str,
        }
    }

    /// Element `i` as a scalar
    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            Self::Int(v) => v.get(i).map(|x| Scalar::Int(*x)),
            Self::UInt(v) => v.get(i).map(|x| Scalar::UInt(*x)),
            Self::Float(v) => v.get(i).map(|x| Scalar::Float(*x)),
            Self::Complex(v) => v.get(i).map(|x| Scalar::Complex(*x)),
            Self::Bool(v) => v.get(i).map(|x| Scalar::Bool(*x)),
            Self::Str(v) => v.get(i).map(|x| Scalar::Str(x.clone())),
        }
    }
}

/// Homogeneous n-dimensional array in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    data: ArrayData,
    shape: Vec<usize>,
}

impl Array {
    /// Create an array, checking that the shape covers the data exactly.
    ///
    /// # Errors
    ///
    /// Returns an error when the product of `shape` differs from the element count.
    pub fn new(data: ArrayData, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::invalid_value(
                "array",
                format!("shape {shape:?} needs {expected} elements, got {}", data.len()),
            ));
        }
        Ok(Self { data, shape })
    }

    /// One-dimensional array
    pub fn from_data(data: ArrayData) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> ScalarKind {
        self.data.kind()
    }

    /// Elementwise view
    pub fn scalars(&self) -> impl Iterator<Item = Scalar> + '_ {
        (0..self.data.len()).filter_map(|i| self.data.get(i))
    }

    pub fn to_json(&self) -> JsonValue {
        let flat: Vec<JsonValue> = self.scalars().map(|s| s.to_json()).collect();
        nest(&flat, &self.shape)
    }
}

/// Value held by a template slot
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Array),
    /// Request to store `payload` compressed at `strength` (0-9)
    Compressed { payload: Box<Value>, strength: u8 },
    /// Soft link to another node, by instance path
    Link(String),
}

impl Value {
    /// Wrap a scalar or array in a compression request.
    ///
    /// # Errors
    ///
    /// Returns an error for nested compression or links, or a strength above 9.
    pub fn compressed(payload: Value, strength: u8) -> Result<Self> {
        if strength > 9 {
            return Err(Error::invalid_value(
                "compression",
                format!("strength {strength} is outside 0..=9"),
            ));
        }
        match payload {
            Value::Scalar(_) | Value::Array(_) => Ok(Value::Compressed {
                payload: Box::new(payload),
                strength,
            }),
            _ => Err(Error::invalid_value(
                "compression",
                "payload must be a scalar or an array",
            )),
        }
    }

    /// The value after unwrapping any compression request
    pub fn payload(&self) -> &Value {
        match self {
            Value::Compressed { payload, .. } => payload,
            other => other,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self.payload() {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }

    /// Short description of the value shape for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Value::Scalar(s) => s.kind().to_string(),
            Value::Array(a) => format!("{} array {:?}", a.kind(), a.shape()),
            Value::Compressed { payload, strength } => {
                format!("compressed({strength}) {}", payload.describe())
            }
            Value::Link(_) => "link".to_string(),
        }
    }

    /// Convert reader-supplied JSON; `null` means "seeded but unset".
    ///
    /// Objects are recognised in three shapes: `{"compress": v, "strength": n}`,
    /// `{"link": "/path"}` and `{"re": x, "im": y}`.
    ///
    /// # Errors
    ///
    /// Returns an error for heterogeneous or ragged arrays and unknown objects.
    pub fn from_json(json: &JsonValue) -> Result<Option<Value>> {
        match json {
            JsonValue::Null => Ok(None),
            JsonValue::Array(_) => array_from_json(json).map(|a| Some(Value::Array(a))),
            JsonValue::Object(map) => object_from_json(map).map(Some),
            other => scalar_from_json(other).map(|s| Some(Value::Scalar(s))),
        }
    }

    /// JSON rendering, the inverse of [`Value::from_json`]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Scalar(s) => s.to_json(),
            Value::Array(a) => a.to_json(),
            Value::Compressed { payload, strength } => {
                json!({"compress": payload.to_json(), "strength": strength})
            }
            Value::Link(target) => json!({ "link": target }),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::Str(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Scalar(Scalar::Str(v))
    }
}

fn float_json(v: f64) -> JsonValue {
    Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
}

fn nest(flat: &[JsonValue], shape: &[usize]) -> JsonValue {
    match shape {
        [] => flat.first().cloned().unwrap_or(JsonValue::Null),
        [_] => JsonValue::Array(flat.to_vec()),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product();
            if stride == 0 {
                return JsonValue::Array(Vec::new());
            }
            JsonValue::Array(flat.chunks(stride).map(|c| nest(c, rest)).collect())
        }
    }
}

fn scalar_from_json(json: &JsonValue) -> Result<Scalar> {
    match json {
        JsonValue::Bool(b) => Ok(Scalar::Bool(*b)),
        JsonValue::String(s) => Ok(Scalar::Str(s.clone())),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Scalar::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Scalar::UInt(u))
            } else {
                n.as_f64()
                    .map(Scalar::Float)
                    .ok_or_else(|| Error::invalid_value("number", n.to_string()))
            }
        }
        JsonValue::Object(map) => complex_from_json(map),
        other => Err(Error::invalid_value(
            "scalar",
            format!("unsupported element {other}"),
        )),
    }
}

fn complex_from_json(map: &Map<String, JsonValue>) -> Result<Scalar> {
    let part = |name: &str| {
        map.get(name)
            .and_then(JsonValue::as_f64)
            .ok_or_else(|| Error::invalid_value("complex", format!("missing numeric '{name}'")))
    };
    if map.len() != 2 {
        return Err(Error::invalid_value(
            "complex",
            "expected exactly the keys 're' and 'im'",
        ));
    }
    Ok(Scalar::Complex(Complex64::new(part("re")?, part("im")?)))
}

fn object_from_json(map: &Map<String, JsonValue>) -> Result<Value> {
    if let Some(payload) = map.get("compress") {
        let strength = match map.get("strength") {
            None => 1,
            Some(s) => s
                .as_u64()
                .and_then(|s| u8::try_from(s).ok())
                .ok_or_else(|| Error::invalid_value("compression", "strength must be 0..=9"))?,
        };
        let Some(inner) = Value::from_json(payload)? else {
            return Err(Error::invalid_value("compression", "payload is null"));
        };
        return Value::compressed(inner, strength);
    }

    if let Some(target) = map.get("link") {
        return target
            .as_str()
            .map(|t| Value::Link(t.to_string()))
            .ok_or_else(|| Error::invalid_value("link", "target must be a string"));
    }

    complex_from_json(map).map(Value::Scalar)
}

fn array_from_json(json: &JsonValue) -> Result<Array> {
    let mut shape = Vec::new();
    let mut cursor = json;
    while let JsonValue::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut leaves = Vec::new();
    collect_leaves(json, &shape, &mut leaves)?;

    let scalars = leaves
        .into_iter()
        .map(scalar_from_json)
        .collect::<Result<Vec<_>>>()?;

    Array::new(homogenize(scalars)?, shape)
}

fn collect_leaves<'a>(
    json: &'a JsonValue,
    shape: &[usize],
    out: &mut Vec<&'a JsonValue>,
) -> Result<()> {
    match (json, shape) {
        (JsonValue::Array(items), [len, rest @ ..]) => {
            if items.len() != *len {
                return Err(Error::invalid_value("array", "ragged nested array"));
            }
            for item in items {
                collect_leaves(item, rest, out)?;
            }
            Ok(())
        }
        (JsonValue::Array(_), []) => Err(Error::invalid_value("array", "ragged nested array")),
        (leaf, []) => {
            out.push(leaf);
            Ok(())
        }
        (_, _) => Err(Error::invalid_value("array", "ragged nested array")),
    }
}

fn homogenize(scalars: Vec<Scalar>) -> Result<ArrayData> {
    let kinds: Vec<ScalarKind> = scalars.iter().map(Scalar::kind).collect();
    let all = |k: ScalarKind| kinds.iter().all(|x| *x == k);
    let numeric = kinds
        .iter()
        .all(|k| matches!(k, ScalarKind::Int | ScalarKind::UInt | ScalarKind::Float));

    if scalars.is_empty() {
        return Ok(ArrayData::Float(Vec::new()));
    }
    if all(ScalarKind::Bool) {
        return Ok(ArrayData::Bool(
            scalars.into_iter().map(|s| matches!(s, Scalar::Bool(true))).collect(),
        ));
    }
    if all(ScalarKind::Str) {
        return Ok(ArrayData::Str(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    Scalar::Str(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ));
    }
    if all(ScalarKind::Int) {
        return Ok(ArrayData::Int(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    Scalar::Int(v) => Some(v),
                    _ => None,
                })
                .collect(),
        ));
    }
    if kinds
        .iter()
        .all(|k| matches!(k, ScalarKind::Int | ScalarKind::UInt))
    {
        // Mixed signed/unsigned JSON integers: anything above i64::MAX forces unsigned.
        let values = scalars
            .into_iter()
            .map(|s| match s {
                Scalar::UInt(v) => Ok(v),
                Scalar::Int(v) => u64::try_from(v).map_err(|_| {
                    Error::invalid_value("array", "mixes negative and >i64::MAX integers")
                }),
                other => Err(Error::invalid_value("array", format!("unexpected {}", other.kind()))),
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(ArrayData::UInt(values));
    }
    if numeric {
        return Ok(ArrayData::Float(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    Scalar::Int(v) => Some(v as f64),
                    Scalar::UInt(v) => Some(v as f64),
                    Scalar::Float(v) => Some(v),
                    _ => None,
                })
                .collect(),
        ));
    }
    if kinds
        .iter()
        .all(|k| matches!(k, ScalarKind::Complex | ScalarKind::Int | ScalarKind::Float))
    {
        return Ok(ArrayData::Complex(
            scalars
                .into_iter()
                .filter_map(|s| match s {
                    Scalar::Complex(c) => Some(c),
                    Scalar::Int(v) => Some(Complex64::new(v as f64, 0.0)),
                    Scalar::Float(v) => Some(Complex64::new(v, 0.0)),
                    _ => None,
                })
                .collect(),
        ));
    }

    Err(Error::invalid_value(
        "array",
        "elements must share one primitive kind",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_from_json() {
        assert_eq!(Value::from_json(&json!(5)).unwrap(), Some(Value::from(5i64)));
        assert_eq!(Value::from_json(&json!(2.5)).unwrap(), Some(Value::from(2.5)));
        assert_eq!(Value::from_json(&json!("x")).unwrap(), Some(Value::from("x")));
        assert_eq!(Value::from_json(&json!(true)).unwrap(), Some(Value::from(true)));
        assert_eq!(Value::from_json(&JsonValue::Null).unwrap(), None);
        assert_eq!(
            Value::from_json(&json!(u64::MAX)).unwrap(),
            Some(Value::Scalar(Scalar::UInt(u64::MAX)))
        );
    }

    #[test]
    fn test_nested_array_shape() {
        let value = Value::from_json(&json!([[1, 2, 3], [4, 5, 6]])).unwrap().unwrap();
        let Value::Array(array) = &value else {
            panic!("expected array, got {value:?}");
        };
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.data(), &ArrayData::Int(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(value.to_json(), json!([[1, 2, 3], [4, 5, 6]]));
    }

    #[test]
    fn test_mixed_numeric_array_promotes_to_float() {
        let value = Value::from_json(&json!([1, 2.5])).unwrap().unwrap();
        assert_eq!(
            value,
            Value::Array(Array::from_data(ArrayData::Float(vec![1.0, 2.5])))
        );
    }

    #[test]
    fn test_ragged_and_heterogeneous_arrays_rejected() {
        assert!(Value::from_json(&json!([[1, 2], [3]])).is_err());
        assert!(Value::from_json(&json!([1, "a"])).is_err());
        assert!(Value::from_json(&json!([[1], 2])).is_err());
    }

    #[test]
    fn test_compression_descriptor() {
        let value = Value::from_json(&json!({"compress": [1.0, 2.0], "strength": 9}))
            .unwrap()
            .unwrap();
        match &value {
            Value::Compressed { payload, strength } => {
                assert_eq!(*strength, 9);
                assert!(matches!(**payload, Value::Array(_)));
            }
            other => panic!("expected compressed value, got {other:?}"),
        }
        assert!(Value::from_json(&json!({"compress": 1, "strength": 12})).is_err());
        assert!(Value::compressed(Value::Link("/x".into()), 3).is_err());
    }

    #[test]
    fn test_link_and_complex_objects() {
        assert_eq!(
            Value::from_json(&json!({"link": "/entry/data"})).unwrap(),
            Some(Value::Link("/entry/data".into()))
        );
        let complex = Value::from_json(&json!({"re": 1.0, "im": -2.0})).unwrap().unwrap();
        assert_eq!(
            complex,
            Value::Scalar(Scalar::Complex(Complex64::new(1.0, -2.0)))
        );
        assert!(Value::from_json(&json!({"unknown": 1})).is_err());
    }

    #[test]
    fn test_array_shape_mismatch() {
        assert!(Array::new(ArrayData::Int(vec![1, 2, 3]), vec![2, 2]).is_err());
    }
}
