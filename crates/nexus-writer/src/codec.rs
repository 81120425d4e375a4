//! Payload encoding for compressed datasets
//!
//! Elements are laid out little-endian in row-major order: 8 bytes per integer or
//! float, 16 per complex number (real then imaginary), 1 per boolean, and a u64
//! byte length followed by UTF-8 bytes per string. A byte-string scalar is stored
//! as is. The encoded buffer is then deflated.

use crate::{Error, Result};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use nexus_ir::{Array, ArrayData, Scalar, ScalarKind, Value};
use num_complex::Complex64;
use std::io::{Read, Write};

/// Stored element type name
pub fn dtype(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int => "int64",
        ScalarKind::UInt => "uint64",
        ScalarKind::Float => "float64",
        ScalarKind::Complex => "complex128",
        ScalarKind::Bool => "bool",
        ScalarKind::Str => "string",
        ScalarKind::Bytes => "bytes",
    }
}

/// Inverse of [`dtype`]
pub fn kind_of(dtype: &str) -> Option<ScalarKind> {
    Some(match dtype {
        "int64" => ScalarKind::Int,
        "uint64" => ScalarKind::UInt,
        "float64" => ScalarKind::Float,
        "complex128" => ScalarKind::Complex,
        "bool" => ScalarKind::Bool,
        "string" => ScalarKind::Str,
        "bytes" => ScalarKind::Bytes,
        _ => return None,
    })
}

/// Element kind and shape of a scalar or array value (`[]` for scalars)
pub fn layout(value: &Value) -> Result<(ScalarKind, Vec<usize>)> {
    match value.payload() {
        Value::Scalar(s) => Ok((s.kind(), Vec::new())),
        Value::Array(a) => Ok((a.kind(), a.shape().to_vec())),
        other => Err(Error::Codec(format!(
            "cannot store {} as a dataset",
            other.describe()
        ))),
    }
}

/// Little-endian bytes of a scalar or array value
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match value.payload() {
        Value::Scalar(s) => push_scalar(&mut out, s),
        Value::Array(a) => a.scalars().for_each(|s| push_scalar(&mut out, &s)),
        other => {
            return Err(Error::Codec(format!("cannot encode {}", other.describe())));
        }
    }
    Ok(out)
}

fn push_scalar(out: &mut Vec<u8>, scalar: &Scalar) {
    match scalar {
        Scalar::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        Scalar::Complex(c) => {
            out.extend_from_slice(&c.re.to_le_bytes());
            out.extend_from_slice(&c.im.to_le_bytes());
        }
        Scalar::Bool(v) => out.push(u8::from(*v)),
        Scalar::Str(s) => {
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Scalar::Bytes(b) => out.extend_from_slice(b),
    }
}

/// Rebuild a value from its little-endian bytes
pub fn decode(kind: ScalarKind, shape: &[usize], bytes: &[u8]) -> Result<Value> {
    if kind == ScalarKind::Bytes && shape.is_empty() {
        return Ok(Value::Scalar(Scalar::Bytes(bytes.to_vec())));
    }

    // the empty product covers scalars: shape [] holds one element
    let count: usize = shape.iter().product();
    let mut cursor = Cursor { bytes, pos: 0 };
    let data = match kind {
        ScalarKind::Int => {
            ArrayData::Int(cursor.many(count, |c| c.word().map(i64::from_le_bytes))?)
        }
        ScalarKind::UInt => {
            ArrayData::UInt(cursor.many(count, |c| c.word().map(u64::from_le_bytes))?)
        }
        ScalarKind::Float => {
            ArrayData::Float(cursor.many(count, |c| c.word().map(f64::from_le_bytes))?)
        }
        ScalarKind::Complex => ArrayData::Complex(cursor.many(count, |c| {
            let re = f64::from_le_bytes(c.word()?);
            let im = f64::from_le_bytes(c.word()?);
            Ok(Complex64::new(re, im))
        })?),
        ScalarKind::Bool => ArrayData::Bool(cursor.many(count, |c| Ok(c.take(1)?[0] != 0))?),
        ScalarKind::Str => ArrayData::Str(cursor.many(count, |c| {
            let len = usize::try_from(u64::from_le_bytes(c.word()?))
                .map_err(|_| Error::Codec("string length overflows".to_string()))?;
            String::from_utf8(c.take(len)?.to_vec())
                .map_err(|e| Error::Codec(format!("invalid UTF-8 in string element: {e}")))
        })?),
        ScalarKind::Bytes => {
            return Err(Error::Codec("byte strings are scalar only".to_string()));
        }
    };

    if cursor.pos != bytes.len() {
        return Err(Error::Codec(format!(
            "{} trailing bytes after {count} elements",
            bytes.len() - cursor.pos
        )));
    }

    if shape.is_empty() {
        return data
            .get(0)
            .map(Value::Scalar)
            .ok_or_else(|| Error::Codec("empty scalar payload".to_string()));
    }
    Ok(Value::Array(Array::new(data, shape.to_vec())?))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .pos
            .checked_add(n)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(|| Error::Codec(format!("payload truncated at byte {}", self.pos)))?;
        self.pos += n;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 8]> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.take(8)?);
        Ok(word)
    }

    fn many<T>(
        &mut self,
        count: usize,
        mut next: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        (0..count).map(|_| next(self)).collect()
    }
}

/// Deflate `raw` at `level` (0-9)
pub fn deflate(raw: &[u8], level: u8) -> Result<Vec<u8>> {
    let failed = |e: std::io::Error| Error::Codec(format!("deflate failed: {e}"));
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(u32::from(level.min(9))));
    encoder.write_all(raw).map_err(failed)?;
    encoder.finish().map_err(failed)
}

pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    DeflateDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|e| Error::Codec(format!("inflate failed: {e}")))?;
    Ok(raw)
}
