// crates/review-harness-postgres/tests/encoding.rs
// ============================================================================
// Module: Postgres Encoding Tests
// Description: Parameter narrowing and numeric decoding without a server.
// ============================================================================

//! Postgres value encoding tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use bytes::BytesMut;
use postgres_types::FromSql;
use postgres_types::IsNull;
use postgres_types::ToSql;
use postgres_types::Type;
use review_harness_core::SqlValue;
use review_harness_postgres::SqlParam;
use review_harness_postgres::decode::NumericValue;
use serde_json::json;

fn encode(value: &SqlValue, ty: &Type) -> Result<(IsNull, Vec<u8>), String> {
    let mut out = BytesMut::new();
    let is_null = SqlParam(value).to_sql_checked(ty, &mut out).map_err(|err| err.to_string())?;
    Ok((is_null, out.to_vec()))
}

#[test]
fn integers_narrow_to_server_width() {
    let (_, int2) = encode(&SqlValue::Int(7), &Type::INT2).unwrap();
    assert_eq!(int2, vec![0, 7]);
    let (_, int4) = encode(&SqlValue::Int(258), &Type::INT4).unwrap();
    assert_eq!(int4, vec![0, 0, 1, 2]);
    let (_, int8) = encode(&SqlValue::Int(-1), &Type::INT8).unwrap();
    assert_eq!(int8, vec![0xFF; 8]);
}

#[test]
fn out_of_range_integer_is_rejected() {
    assert!(encode(&SqlValue::Int(70_000), &Type::INT2).is_err());
    assert!(encode(&SqlValue::Int(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
}

#[test]
fn null_binds_as_null_for_any_type() {
    let (is_null, bytes) = encode(&SqlValue::Null, &Type::INT4).unwrap();
    assert!(matches!(is_null, IsNull::Yes));
    assert!(bytes.is_empty());
}

#[test]
fn mismatched_types_are_rejected() {
    assert!(encode(&SqlValue::Text("abc".to_string()), &Type::INT4).is_err());
    assert!(encode(&SqlValue::Bool(true), &Type::TEXT).is_err());
}

#[test]
fn text_float_and_json_encode() {
    let (_, text) = encode(&SqlValue::Text("pg".to_string()), &Type::VARCHAR).unwrap();
    assert_eq!(text, b"pg".to_vec());
    let (_, float4) = encode(&SqlValue::Float(1.5), &Type::FLOAT4).unwrap();
    assert_eq!(float4, 1.5_f32.to_be_bytes().to_vec());
    let (_, float8) = encode(&SqlValue::Float(1.5), &Type::FLOAT8).unwrap();
    assert_eq!(float8, 1.5_f64.to_be_bytes().to_vec());
    let (_, jsonb) = encode(&SqlValue::Json(json!({ "a": 1 })), &Type::JSONB).unwrap();
    assert_eq!(jsonb.first(), Some(&1));
}

/// Builds a binary `numeric` payload.
fn numeric(weight: i16, sign: u16, digits: &[u16]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&u16::try_from(digits.len()).unwrap().to_be_bytes());
    raw.extend_from_slice(&weight.to_be_bytes());
    raw.extend_from_slice(&sign.to_be_bytes());
    raw.extend_from_slice(&0_u16.to_be_bytes());
    for digit in digits {
        raw.extend_from_slice(&digit.to_be_bytes());
    }
    raw
}

#[test]
fn numeric_decodes_to_f64() {
    let value = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0, &[4, 2500])).unwrap();
    assert!((value.0 - 4.25).abs() < 1e-9);
    let large = NumericValue::from_sql(&Type::NUMERIC, &numeric(1, 0x4000, &[12, 3456])).unwrap();
    assert!((large.0 + 123_456.0).abs() < 1e-9);
    let zero = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0, &[])).unwrap();
    assert!(zero.0.abs() < f64::EPSILON);
    let nan = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0xC000, &[])).unwrap();
    assert!(nan.0.is_nan());
}

#[test]
fn numeric_infinities_decode_to_f64_infinities() {
    let positive = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0xD000, &[])).unwrap();
    assert!(positive.0.is_infinite() && positive.0.is_sign_positive());
    let negative = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0xF000, &[])).unwrap();
    assert!(negative.0.is_infinite() && negative.0.is_sign_negative());
    let err = NumericValue::from_sql(&Type::NUMERIC, &numeric(0, 0x8000, &[1])).err().unwrap();
    assert!(err.to_string().contains("0x8000"));
}

#[test]
fn truncated_numeric_is_rejected() {
    let mut raw = numeric(0, 0, &[1, 2]);
    raw.truncate(raw.len() - 1);
    assert!(NumericValue::from_sql(&Type::NUMERIC, &raw).is_err());
    assert!(NumericValue::accepts(&Type::NUMERIC));
    assert!(!NumericValue::accepts(&Type::FLOAT8));
}
