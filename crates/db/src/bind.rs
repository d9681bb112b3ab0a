//! Parameter binding for Postgres queries.
//!
//! JSON parameters carry no column types. Numbers and booleans bind as
//! `int8`, `float8` and `bool`, nulls bind untyped, and strings are
//! converted to whatever type the server infers for their placeholder, so
//! `"2024-03-01"` can land in a `date` column and `"43"` can be compared
//! with an `int4`.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use fanout_core::error::CoreError;
use fanout_core::types::{SqlParam, StatementRequest};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgConnection, PgTypeInfo, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Either, Executor, Postgres, Statement, TypeInfo};
use uuid::Uuid;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Type left for the server to infer (OID 0).
fn unspecified() -> PgTypeInfo {
    PgTypeInfo::with_oid(Oid(0))
}

/// A NULL sent with no declared type.
///
/// Postgres infers the parameter type from the statement, so a JSON `null`
/// works for any column type just like a literal `NULL` would.
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        unspecified()
    }
}

impl sqlx::Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// A string sent as a type whose binary form is its UTF-8 text, such as an
/// enum label.
struct LabelText<'a> {
    value: &'a str,
    ty: PgTypeInfo,
}

impl sqlx::Type<Postgres> for LabelText<'_> {
    fn type_info() -> PgTypeInfo {
        unspecified()
    }
}

impl sqlx::Encode<'_, Postgres> for LabelText<'_> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        buf.extend_from_slice(self.value.as_bytes());
        Ok(IsNull::No)
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.ty.clone())
    }
}

/// A string parameter converted to the type inferred for its placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TextValue<'a> {
    Text(&'a str),
    Label(&'a str, PgTypeInfo),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

/// Types declared when describing the statement. Strings and nulls are
/// left unspecified so the server picks their type from context.
fn declared_types(request: &StatementRequest) -> Vec<PgTypeInfo> {
    request
        .params()
        .iter()
        .map(|param| match param {
            SqlParam::Null | SqlParam::Text(_) => unspecified(),
            SqlParam::Bool(_) => <bool as sqlx::Type<Postgres>>::type_info(),
            SqlParam::Int(_) => <i64 as sqlx::Type<Postgres>>::type_info(),
            SqlParam::Float(_) => <f64 as sqlx::Type<Postgres>>::type_info(),
        })
        .collect()
}

/// Ask the server which type each placeholder takes.
///
/// Skipped (empty result) when the request has no string parameters, since
/// every other parameter already carries its type.
pub async fn infer_param_types(
    conn: &mut PgConnection,
    request: &StatementRequest,
) -> Result<Vec<PgTypeInfo>, sqlx::Error> {
    if !request.params().iter().any(|p| matches!(p, SqlParam::Text(_))) {
        return Ok(Vec::new());
    }

    let declared = declared_types(request);
    let statement = (&mut *conn).prepare_with(request.sql(), &declared).await?;

    Ok(match statement.parameters() {
        Some(Either::Left(types)) => types.to_vec(),
        _ => Vec::new(),
    })
}

/// Build a query for `request` with every parameter bound in order.
///
/// `inferred` holds the server's placeholder types from
/// [`infer_param_types`]; strings without an inferred type bind as `text`.
/// The statement text is passed through untouched.
pub fn bind_request<'q>(
    request: &'q StatementRequest,
    inferred: &[PgTypeInfo],
) -> Result<PgQuery<'q>, CoreError> {
    let mut query = sqlx::query(request.sql());

    for (index, param) in request.params().iter().enumerate() {
        query = match param {
            SqlParam::Null => query.bind(UntypedNull),
            SqlParam::Bool(b) => query.bind(*b),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Text(s) => {
                let value = coerce_text(index + 1, s, inferred.get(index))?;
                bind_text(query, value)
            }
        };
    }

    Ok(query)
}

fn bind_text<'q>(query: PgQuery<'q>, value: TextValue<'q>) -> PgQuery<'q> {
    match value {
        TextValue::Text(s) => query.bind(s),
        TextValue::Label(value, ty) => query.bind(LabelText { value, ty }),
        TextValue::Bool(v) => query.bind(v),
        TextValue::Int2(v) => query.bind(v),
        TextValue::Int4(v) => query.bind(v),
        TextValue::Int8(v) => query.bind(v),
        TextValue::Float4(v) => query.bind(v),
        TextValue::Float8(v) => query.bind(v),
        TextValue::Numeric(v) => query.bind(v),
        TextValue::Date(v) => query.bind(v),
        TextValue::Time(v) => query.bind(v),
        TextValue::Timestamp(v) => query.bind(v),
        TextValue::Timestamptz(v) => query.bind(v),
        TextValue::Uuid(v) => query.bind(v),
        TextValue::Json(v) => query.bind(Json(v)),
    }
}

/// Convert the string bound at `position` (1-based) to `inferred`.
///
/// Strings the type cannot parse, and types with no string conversion,
/// are rejected before anything is sent.
pub fn coerce_text<'a>(
    position: usize,
    value: &'a str,
    inferred: Option<&PgTypeInfo>,
) -> Result<TextValue<'a>, CoreError> {
    let Some(ty) = inferred else {
        return Ok(TextValue::Text(value));
    };

    if matches!(ty.kind(), PgTypeKind::Enum(_)) {
        return Ok(TextValue::Label(value, ty.clone()));
    }

    let converted = match ty.name() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "\"CHAR\"" | "UNKNOWN" | "citext" => {
            Ok(TextValue::Text(value))
        }
        "BOOL" => parse_bool(value).map(TextValue::Bool),
        "INT2" => parse(value).map(TextValue::Int2),
        "INT4" => parse(value).map(TextValue::Int4),
        "INT8" => parse(value).map(TextValue::Int8),
        "FLOAT4" => parse(value).map(TextValue::Float4),
        "FLOAT8" => parse(value).map(TextValue::Float8),
        "NUMERIC" => parse(value).map(TextValue::Numeric),
        "DATE" => parse(value).map(TextValue::Date),
        "TIME" => parse(value).map(TextValue::Time),
        "TIMESTAMP" => parse_timestamp(value).map(TextValue::Timestamp),
        "TIMESTAMPTZ" => parse_timestamptz(value).map(TextValue::Timestamptz),
        "UUID" => Uuid::parse_str(value.trim())
            .map(TextValue::Uuid)
            .map_err(|e| e.to_string()),
        "JSON" | "JSONB" => serde_json::from_str(value)
            .map(TextValue::Json)
            .map_err(|e| e.to_string()),
        other => {
            return Err(CoreError::Execution(format!(
                "Parameter ${position} is a string but the statement expects {}, \
                 which has no string conversion",
                other.to_lowercase()
            )))
        }
    };

    converted.map_err(|e| {
        CoreError::Execution(format!(
            "Parameter ${position} is not a valid {}: {e}",
            ty.name().to_lowercase()
        ))
    })
}

fn parse<T>(value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("'{value}' is not a boolean")),
    }
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDate::from_str(value).map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|e| e.to_string())
}

fn parse_timestamptz(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
