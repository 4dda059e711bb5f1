//! Bencoded symbolic input descriptor.
//!
//! Grounded in `symbolic_format.cpp`: the descriptor is a bencoded list of
//! `[name, bitsize, spec]` triples. `spec` is interpreted by its element
//! type rather than by an explicit tag:
//!
//! - a list of integers is a concrete byte vector (it must have exactly
//!   `bitsize / 8` entries, each in `0..=255`);
//! - a list of strings is a set of KQuery-syntax constraints to register
//!   as assumptions against the freshly minted symbol;
//! - an empty list leaves the field unconstrained and symbolic.

use serde::Deserialize;
use serde_bencode::value::Value as BValue;

use crate::error::{EngineError, Result};
use crate::expr::{BitVector, ConcolicValue};
use crate::solver::Solver;
use crate::trace::Trace;

#[derive(Debug, Deserialize)]
struct RawField(String, u32, BValue);

pub enum FieldSpec {
    /// Leave the field symbolic, with `String` constraints to assume.
    Constrained(Vec<String>),
    /// Fully concrete; the exact byte vector to use.
    Concrete(Vec<u8>),
    /// Unconstrained symbolic.
    Free,
}

pub struct Field {
    pub name: String,
    pub bitsize: u32,
    pub spec: FieldSpec,
}

pub struct SymbolicFormat {
    pub fields: Vec<Field>,
}

impl SymbolicFormat {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw: Vec<RawField> = serde_bencode::from_bytes(data)
            .map_err(|e| EngineError::MalformedDescriptor(format!("bencode: {e}")))?;

        let mut fields = Vec::with_capacity(raw.len());
        for RawField(name, bitsize, spec) in raw {
            let expected_bytes = to_byte_size(bitsize)?;
            let spec = match spec {
                BValue::List(items) if items.is_empty() => FieldSpec::Free,
                BValue::List(items) if items.iter().all(|v| matches!(v, BValue::Int(_))) => {
                    let mut bytes = Vec::with_capacity(items.len());
                    for item in items {
                        let n = match item {
                            BValue::Int(n) => n,
                            _ => unreachable!(),
                        };
                        if !(0..=255).contains(&n) {
                            return Err(EngineError::MalformedDescriptor(format!(
                                "field {name}: byte value {n} out of range"
                            )));
                        }
                        bytes.push(n as u8);
                    }
                    if bytes.len() != expected_bytes {
                        return Err(EngineError::MalformedDescriptor(format!(
                            "field {name}: expected {expected_bytes} bytes, got {}",
                            bytes.len()
                        )));
                    }
                    FieldSpec::Concrete(bytes)
                }
                BValue::List(items) => {
                    let mut constraints = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            BValue::Bytes(b) => constraints.push(
                                String::from_utf8(b).map_err(|e| {
                                    EngineError::MalformedDescriptor(format!(
                                        "field {name}: non-utf8 constraint: {e}"
                                    ))
                                })?,
                            ),
                            _ => {
                                return Err(EngineError::MalformedDescriptor(format!(
                                    "field {name}: mixed-type constraint list"
                                )))
                            }
                        }
                    }
                    FieldSpec::Constrained(constraints)
                }
                _ => {
                    return Err(EngineError::MalformedDescriptor(format!(
                        "field {name}: spec must be a list"
                    )))
                }
            };
            fields.push(Field { name, bitsize, spec });
        }

        Ok(SymbolicFormat { fields })
    }

    /// Materialize every field as a `ConcolicValue`, registering
    /// constraints from `FieldSpec::Constrained` fields into `trace`.
    pub fn instantiate(&self, solver: &Solver, trace: &mut Trace) -> Result<Vec<ConcolicValue>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match &field.spec {
                FieldSpec::Concrete(bytes) => solver.bvc_from_bytes(bytes),
                FieldSpec::Free => solver.bvc_symbol(&field.name, field.bitsize, 0),
                FieldSpec::Constrained(constraints) => {
                    let symbol = BitVector::symbol(field.bitsize, field.name.clone());
                    for kquery in constraints {
                        let parsed = parse_kquery_stub(kquery, &symbol)?;
                        trace.assume(&parsed);
                    }
                    ConcolicValue::new_symbolic(BitVector::constant(field.bitsize, 0), symbol)
                }
            };
            out.push(value);
        }
        Ok(out)
    }
}

fn to_byte_size(bitsize: u32) -> Result<usize> {
    if bitsize % 8 != 0 {
        return Err(EngineError::MalformedDescriptor(format!(
            "bitsize {bitsize} is not byte-aligned"
        )));
    }
    Ok((bitsize / 8) as usize)
}

/// Parses the narrow subset of KQuery constraint syntax this crate
/// actually needs: `(Ult (ReadLSB w0 0 name) const)` and the `Ule`/`Eq`
/// variants. A full KQuery expression parser is out of scope; unsupported
/// syntax is rejected rather than silently ignored.
fn parse_kquery_stub(src: &str, symbol: &BitVector) -> Result<BitVector> {
    let src = src.trim();
    let inner = src
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| EngineError::MalformedDescriptor(format!("malformed constraint: {src}")))?;
    let mut parts = inner.splitn(2, char::is_whitespace);
    let op = parts
        .next()
        .ok_or_else(|| EngineError::MalformedDescriptor(format!("empty constraint: {src}")))?;
    let rest = parts.next().unwrap_or("").trim();
    let constant: u64 = rest
        .trim_end_matches(')')
        .rsplit(' ')
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| EngineError::MalformedDescriptor(format!("expected trailing constant: {src}")))?;
    let rhs = BitVector::constant(symbol.width(), constant);

    match op {
        "Ult" => Ok(symbol.ult(&rhs)),
        "Ule" => Ok(symbol.ule(&rhs)),
        "Eq" => Ok(symbol.eq(&rhs)),
        other => Err(EngineError::MalformedDescriptor(format!(
            "unsupported constraint operator: {other}"
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Wraps a single already-bencoded [name, bitsize, spec] tuple as the
    // one-element outer list `Vec<RawField>` expects.
    fn wrap(tuple: &str) -> Vec<u8> {
        format!("l{tuple}e").into_bytes()
    }

    #[test]
    fn parses_concrete_field() {
        let descriptor = wrap("l3:fooi8eli1ei2ei3eee");
        let fmt = SymbolicFormat::parse(&descriptor).unwrap();
        assert_eq!(fmt.fields.len(), 1);
        assert_eq!(fmt.fields[0].name, "foo");
        assert!(matches!(fmt.fields[0].spec, FieldSpec::Concrete(ref b) if b == &vec![1,2,3]));
    }

    #[test]
    fn parses_free_field() {
        let descriptor = wrap("l3:bari8elee");
        let fmt = SymbolicFormat::parse(&descriptor).unwrap();
        assert!(matches!(fmt.fields[0].spec, FieldSpec::Free));
    }

    #[test]
    fn rejects_wrong_byte_count() {
        let descriptor = wrap("l3:fooi16eli1eee");
        let err = SymbolicFormat::parse(&descriptor).unwrap_err();
        assert!(matches!(err, EngineError::MalformedDescriptor(_)));
    }
}
