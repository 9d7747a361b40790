// crates/review-harness-postgres/src/decode.rs
// ============================================================================
// Module: Column Decoding
// Description: Converts Postgres result columns into harness SQL values.
// Purpose: Materialize rows without knowing the result types in advance.
// Dependencies: postgres, postgres-types, serde_json, time
// ============================================================================

//! ## Overview
//! Checks run against catalog views and aggregate functions whose result
//! types vary (`count` is `int8`, `avg` is `numeric`, `pg_stat_*` mixes
//! `oid`, `name`, and `timestamptz`). Decoding is driven by the column type
//! name. Types without a dedicated mapping decode to a `<typename>`
//! placeholder, or `NULL` when the column is null.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::error::Error;

use postgres::Row;
use postgres_types::FromSql;
use postgres_types::Type;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::SqlValue;
use serde_json::Value;
use time::Date;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::classify_error;

/// Boxed conversion error used by `postgres-types`.
type BoxError = Box<dyn Error + Sync + Send>;

/// Sign word of a negative `numeric`.
const NUMERIC_NEG: u16 = 0x4000;
/// Sign word of a `numeric` NaN.
const NUMERIC_NAN: u16 = 0xC000;
/// Sign word of `numeric` positive infinity.
const NUMERIC_PINF: u16 = 0xD000;
/// Sign word of `numeric` negative infinity.
const NUMERIC_NINF: u16 = 0xF000;
/// Base of `numeric` digit groups.
const NUMERIC_BASE: f64 = 10_000.0;

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Decodes every column of a row.
///
/// # Errors
///
/// Returns [`DbError`] when a column cannot be converted.
pub fn decode_row(row: &Row) -> Result<Vec<SqlValue>, DbError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| decode_column(row, index, column.type_()))
        .collect()
}

/// Decodes one column by its Postgres type.
fn decode_column(row: &Row, index: usize, ty: &Type) -> Result<SqlValue, DbError> {
    let value = match ty.name() {
        "bool" => SqlValue::from(get::<bool>(row, index)?),
        "int2" => get::<i16>(row, index)?.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))),
        "int4" => SqlValue::from(get::<i32>(row, index)?),
        "int8" => SqlValue::from(get::<i64>(row, index)?),
        "oid" | "xid" => get::<u32>(row, index)?.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v))),
        "float4" => get::<f32>(row, index)?.map_or(SqlValue::Null, |v| SqlValue::Float(f64::from(v))),
        "float8" => SqlValue::from(get::<f64>(row, index)?),
        "numeric" => get::<NumericValue>(row, index)?.map_or(SqlValue::Null, |v| SqlValue::Float(v.0)),
        "text" | "varchar" | "name" | "bpchar" | "unknown" => SqlValue::from(get::<String>(row, index)?),
        "json" | "jsonb" => get::<Value>(row, index)?.map_or(SqlValue::Null, SqlValue::Json),
        "timestamptz" => match get::<OffsetDateTime>(row, index)? {
            Some(stamp) => SqlValue::Text(format_rfc3339(stamp)?),
            None => SqlValue::Null,
        },
        "timestamp" => match get::<PrimitiveDateTime>(row, index)? {
            Some(stamp) => SqlValue::Text(format_rfc3339(stamp.assume_utc())?),
            None => SqlValue::Null,
        },
        "date" => get::<Date>(row, index)?.map_or(SqlValue::Null, |date| SqlValue::Text(date.to_string())),
        other => match get::<Opaque>(row, index)? {
            Some(Opaque) => SqlValue::Text(format!("<{other}>")),
            None => SqlValue::Null,
        },
    };
    Ok(value)
}

/// Reads a nullable column.
fn get<'a, T: FromSql<'a>>(row: &'a Row, index: usize) -> Result<Option<T>, DbError> {
    row.try_get::<_, Option<T>>(index).map_err(|err| classify_error(&err))
}

/// Formats a timestamp as RFC 3339.
fn format_rfc3339(stamp: OffsetDateTime) -> Result<String, DbError> {
    stamp.format(&Rfc3339).map_err(|err| DbError::new(DbErrorKind::Other, err.to_string()))
}

// ============================================================================
// SECTION: Numeric
// ============================================================================

/// `numeric` value widened to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericValue(pub f64);

impl<'a> FromSql<'a> for NumericValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let word = |offset: usize| -> Result<u16, BoxError> {
            raw.get(offset .. offset + 2)
                .and_then(|bytes| <[u8; 2]>::try_from(bytes).ok())
                .map(u16::from_be_bytes)
                .ok_or_else(|| "truncated numeric value".into())
        };
        let ndigits = usize::from(word(0)?);
        let weight = i32::from(word(2)?.cast_signed());
        let sign = word(4)?;
        match sign {
            NUMERIC_NAN => return Ok(Self(f64::NAN)),
            NUMERIC_PINF => return Ok(Self(f64::INFINITY)),
            NUMERIC_NINF => return Ok(Self(f64::NEG_INFINITY)),
            0 | NUMERIC_NEG => {}
            other => return Err(format!("unknown numeric sign word {other:#06x}").into()),
        }
        let mut value = 0.0_f64;
        for position in 0 .. ndigits {
            let digit = f64::from(word(8 + position * 2)?);
            let exponent = weight - i32::try_from(position)?;
            value += digit * NUMERIC_BASE.powi(exponent);
        }
        Ok(Self(if sign == NUMERIC_NEG { -value } else { value }))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

// ============================================================================
// SECTION: Opaque
// ============================================================================

/// Accepts any type; used to tell `NULL` apart for unmapped types.
struct Opaque;

impl<'a> FromSql<'a> for Opaque {
    fn from_sql(_ty: &Type, _raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
