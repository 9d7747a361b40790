// crates/review-harness-postgres/src/params.rs
// ============================================================================
// Module: Parameter Encoding
// Description: Binary encoding of harness SQL values as Postgres parameters.
// Purpose: Bind dynamically typed values against the server-inferred type.
// Dependencies: bytes, postgres-types
// ============================================================================

//! ## Overview
//! [`SqlValue`] widens every integer to `i64` and every float to `f64`, while
//! the server infers a concrete parameter type from the statement. The
//! [`SqlParam`] wrapper narrows the value to that type at bind time. A value
//! that does not fit (an out-of-range integer, text bound to an integer
//! column) is rejected as a conversion error before anything is sent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::error::Error;

use bytes::BytesMut;
use postgres_types::IsNull;
use postgres_types::ToSql;
use postgres_types::Type;
use postgres_types::to_sql_checked;
use review_harness_core::SqlValue;

/// Boxed conversion error used by `postgres-types`.
type BoxError = Box<dyn Error + Sync + Send>;

// ============================================================================
// SECTION: Parameter Wrapper
// ============================================================================

/// Borrowed [`SqlValue`] bound as a statement parameter.
#[derive(Debug, Clone, Copy)]
pub struct SqlParam<'a>(pub &'a SqlValue);

impl SqlParam<'_> {
    /// Wraps every value of a parameter list.
    #[must_use]
    pub fn bind_all(values: &[SqlValue]) -> Vec<SqlParam<'_>> {
        values.iter().map(SqlParam).collect()
    }
}

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(value) => value.to_sql_checked(ty, out),
            SqlValue::Int(value) => encode_int(*value, ty, out),
            SqlValue::Float(value) => encode_float(*value, ty, out),
            SqlValue::Text(value) => value.as_str().to_sql_checked(ty, out),
            SqlValue::Json(value) => value.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

// ============================================================================
// SECTION: Narrowing
// ============================================================================

/// Encodes an integer at the width the server expects.
fn encode_int(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(value)?.to_sql_checked(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(value)?.to_sql_checked(ty, out)
    } else if *ty == Type::OID {
        u32::try_from(value)?.to_sql_checked(ty, out)
    } else {
        value.to_sql_checked(ty, out)
    }
}

/// Encodes a float at the width the server expects.
fn encode_float(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        #[allow(clippy::cast_possible_truncation, reason = "float4 parameters accept precision loss.")]
        let narrowed = value as f32;
        narrowed.to_sql_checked(ty, out)
    } else {
        value.to_sql_checked(ty, out)
    }
}
