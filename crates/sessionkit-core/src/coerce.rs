//! Type-coercion helpers over `(value, error)` results
//!
//! These are the strict variants: a value must already be of the requested
//! native type. They back the default methods on [`Store`](crate::Store);
//! backends whose wire format differs (Redis byte strings, Postgres JSON)
//! override the trait methods and reuse [`unwrap_value`] for the shared
//! error/nil handling.

use crate::store::{StoreError, StoreResult};
use crate::value::Value;

/// Pass an incoming error through and classify `Nil` as [`StoreError::Nil`].
pub fn unwrap_value(r: StoreResult<Value>) -> StoreResult<Value> {
    match r? {
        Value::Nil => Err(StoreError::Nil),
        v => Ok(v),
    }
}

pub fn int(r: StoreResult<Value>) -> StoreResult<i32> {
    match unwrap_value(r)? {
        Value::Int(n) => i32::try_from(n).map_err(|_| StoreError::AssertType),
        _ => Err(StoreError::AssertType),
    }
}

pub fn int64(r: StoreResult<Value>) -> StoreResult<i64> {
    match unwrap_value(r)? {
        Value::Int(n) => Ok(n),
        _ => Err(StoreError::AssertType),
    }
}

pub fn uint64(r: StoreResult<Value>) -> StoreResult<u64> {
    match unwrap_value(r)? {
        Value::Int(n) => u64::try_from(n).map_err(|_| StoreError::AssertType),
        _ => Err(StoreError::AssertType),
    }
}

pub fn float64(r: StoreResult<Value>) -> StoreResult<f64> {
    match unwrap_value(r)? {
        Value::Float(n) => Ok(n),
        _ => Err(StoreError::AssertType),
    }
}

pub fn string(r: StoreResult<Value>) -> StoreResult<String> {
    match unwrap_value(r)? {
        Value::String(s) => Ok(s),
        _ => Err(StoreError::AssertType),
    }
}

pub fn bytes(r: StoreResult<Value>) -> StoreResult<Vec<u8>> {
    match unwrap_value(r)? {
        Value::Bytes(b) => Ok(b),
        _ => Err(StoreError::AssertType),
    }
}

pub fn bool(r: StoreResult<Value>) -> StoreResult<bool> {
    match unwrap_value(r)? {
        Value::Bool(b) => Ok(b),
        _ => Err(StoreError::AssertType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_types_pass() {
        assert_eq!(int(Ok(Value::Int(42))), Ok(42));
        assert_eq!(int64(Ok(Value::Int(-5))), Ok(-5));
        assert_eq!(uint64(Ok(Value::Int(9))), Ok(9));
        assert_eq!(float64(Ok(Value::Float(1.5))), Ok(1.5));
        assert_eq!(string(Ok(Value::from("x"))), Ok("x".to_string()));
        assert_eq!(bytes(Ok(Value::Bytes(vec![1, 2]))), Ok(vec![1, 2]));
        assert_eq!(bool(Ok(Value::Bool(true))), Ok(true));
    }

    #[test]
    fn test_nil_is_classified() {
        assert_eq!(int(Ok(Value::Nil)), Err(StoreError::Nil));
        assert_eq!(string(Ok(Value::Nil)), Err(StoreError::Nil));
    }

    #[test]
    fn test_wrong_type_is_assert_type() {
        assert_eq!(int(Ok(Value::from("42"))), Err(StoreError::AssertType));
        assert_eq!(bool(Ok(Value::Int(1))), Err(StoreError::AssertType));
        assert_eq!(float64(Ok(Value::Int(1))), Err(StoreError::AssertType));
    }

    #[test]
    fn test_out_of_range_is_assert_type() {
        assert_eq!(int(Ok(Value::Int(i64::MAX))), Err(StoreError::AssertType));
        assert_eq!(uint64(Ok(Value::Int(-1))), Err(StoreError::AssertType));
    }

    #[test]
    fn test_incoming_error_passes_through() {
        assert_eq!(
            int(Err(StoreError::FieldNotFound)),
            Err(StoreError::FieldNotFound)
        );
        assert_eq!(
            bytes(Err(StoreError::Backend("down".to_string()))),
            Err(StoreError::Backend("down".to_string()))
        );
    }
}
