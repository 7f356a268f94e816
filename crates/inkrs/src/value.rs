//! Runtime values.
//!
//! Grounded on `inkpy/runtime/value.py`'s `ValueType` hierarchy and on the
//! teacher's own `PyValue` (`litter/src/value.rs`), which this mirrors in
//! shape: a flat enum plus typed accessors and a numeric-coercion ladder
//! rather than a class per value type.

use std::fmt;

use crate::error::{Error, Result};
use crate::list::InkList;
use crate::path::Path;

/// A value's type, ordered the way `inkpy` orders `ValueType` for numeric
/// coercion: booleans coerce beneath ints, and string is the coercion
/// ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    List,
    String,
    DivertTarget,
    VariablePointer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(InkList),
    DivertTarget(Path),
    /// A reference to a variable by name, used for passing ink variables by
    /// reference into `EXTERNAL` / native functions.
    VariablePointer { name: String, context_index: i32 },
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::DivertTarget(_) => ValueKind::DivertTarget,
            Value::VariablePointer { .. } => ValueKind::VariablePointer,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            ValueKind::Bool => "Bool",
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::String => "String",
            ValueKind::List => "List",
            ValueKind::DivertTarget => "DivertTarget",
            ValueKind::VariablePointer => "VariablePointer",
        }
    }

    pub fn is_truthy(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::String(s) => Ok(!s.is_empty()),
            Value::List(l) => Ok(!l.is_empty()),
            Value::DivertTarget(_) | Value::VariablePointer { .. } => Err(Error::Story(
                format!("shouldn't use a {} as a condition", self.type_name()),
            )),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            Value::String(s) => s.trim().parse().map_err(|_| Error::Type {
                expected: "Int".into(),
                got: format!("String({s:?})"),
            }),
            other => Err(Error::Type { expected: "Int".into(), got: other.type_name().into() }),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::String(s) => s.trim().parse().map_err(|_| Error::Type {
                expected: "Float".into(),
                got: format!("String({s:?})"),
            }),
            other => Err(Error::Type { expected: "Float".into(), got: other.type_name().into() }),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_ink_float(*f),
            Value::String(s) => s.clone(),
            Value::List(l) => l.to_string(),
            Value::DivertTarget(p) => p.to_string(),
            Value::VariablePointer { name, .. } => name.clone(),
        }
    }

    /// Cast to the given kind, following the widening/narrowing rules ink's
    /// native-function coercion relies on. `DivertTarget` and
    /// `VariablePointer` only ever cast to themselves.
    pub fn cast(&self, target: ValueKind) -> Result<Value> {
        if self.kind() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (_, ValueKind::Bool) => Ok(Value::Bool(self.is_truthy()?)),
            (_, ValueKind::Int) => Ok(Value::Int(self.as_int()?)),
            (_, ValueKind::Float) => Ok(Value::Float(self.as_float()?)),
            (_, ValueKind::String) => Ok(Value::String(self.as_string())),
            _ => Err(Error::Story(format!(
                "can't cast {} to {:?}",
                self.type_name(),
                target
            ))),
        }
    }
}

/// ink renders whole-number floats without a trailing `.0`.
fn format_ink_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// The coercion target for a binary operation between two values: the wider
/// of the two kinds on the `Bool < Int < Float` ladder, or an error if
/// neither side is numeric-coercible (e.g. mixing `List` and `String`).
pub fn numeric_coercion_target(a: &Value, b: &Value) -> Result<ValueKind> {
    use ValueKind::*;
    let ka = a.kind();
    let kb = b.kind();
    let rank = |k: ValueKind| match k {
        Bool => 0,
        Int => 1,
        Float => 2,
        _ => 3,
    };
    if rank(ka) <= 2 && rank(kb) <= 2 {
        return Ok(if rank(ka) >= rank(kb) { ka } else { kb });
    }
    if ka == kb {
        return Ok(ka);
    }
    Err(Error::Story(format!(
        "can not perform operation on {} and {}",
        a.type_name(),
        b.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_coerces_beneath_int() {
        let kind = numeric_coercion_target(&Value::Bool(true), &Value::Int(3)).unwrap();
        assert_eq!(kind, ValueKind::Int);
    }

    #[test]
    fn int_and_float_coerce_to_float() {
        let kind = numeric_coercion_target(&Value::Int(1), &Value::Float(2.5)).unwrap();
        assert_eq!(kind, ValueKind::Float);
    }

    #[test]
    fn float_formats_without_trailing_zero() {
        assert_eq!(Value::Float(4.0).as_string(), "4");
        assert_eq!(Value::Float(4.5).as_string(), "4.5");
    }

    #[test]
    fn divert_target_is_not_truthy() {
        assert!(Value::DivertTarget(Path::parse("knot")).is_truthy().is_err());
    }
}
