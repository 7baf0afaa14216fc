//! JSON ⇄ PostgreSQL value conversion.
//!
//! # Responsibilities
//! - Send JSON query variables as text-format parameters
//! - Decode binary result values of any type into JSON
//! - Quote identifiers interpolated into SQL
//!
//! # Design Decisions
//! - Parameters are text so the server infers and parses their types
//! - Decoding never refuses a type; unknown types become a hex string
//! - Date and time values keep the server's clock, no timezone conversion

use std::error::Error;
use std::fmt::Write;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use fallible_iterator::FallibleIterator;
use postgres_protocol::types::array_from_sql;
use serde_json::{Number, Value};
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};

use crate::pg::DbError;

type BoxError = Box<dyn Error + Sync + Send>;

/// A query variable, sent to the server as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextParam(Option<String>);

impl TextParam {
    pub fn null() -> Self {
        TextParam(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&Value> for TextParam {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => TextParam(None),
            Value::String(s) => TextParam(Some(s.clone())),
            Value::Array(items) => TextParam(Some(array_literal(items))),
            // numbers, booleans and objects all have a JSON text form the server accepts
            other => TextParam(Some(other.to_string())),
        }
    }
}

impl From<&str> for TextParam {
    fn from(value: &str) -> Self {
        TextParam(Some(value.to_string()))
    }
}

impl ToSql for TextParam {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Postgres array literal: `{"a","b \"c\"",NULL}`.
pub fn array_literal(items: &[Value]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Array(nested) => out.push_str(&array_literal(nested)),
            Value::String(s) => push_quoted(&mut out, s),
            other => push_quoted(&mut out, &other.to_string()),
        }
    }
    out.push('}');
    out
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Double-quote each dot-separated part: `public.orders` → `"public"."orders"`.
pub fn quote_ident(name: &str) -> Result<String, DbError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(parts
        .iter()
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join("."))
}

/// A result value of any column type, decoded to JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PgValue(pub Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode(ty, raw).map(PgValue)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(PgValue(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Arrays of any dimension become nested JSON arrays, outermost dimension first.
fn decode_array(member: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    let array = array_from_sql(raw)?;
    let dimensions: Vec<usize> = array
        .dimensions()
        .map(|dimension| Ok(usize::try_from(dimension.len).unwrap_or(0)))
        .collect()?;
    let items: Vec<Value> = array
        .values()
        .map(|item| item.map_or(Ok(Value::Null), |raw| decode(member, raw)))
        .collect()?;
    Ok(nest(&dimensions, &mut items.into_iter()))
}

fn nest(dimensions: &[usize], items: &mut impl Iterator<Item = Value>) -> Value {
    match dimensions.split_first() {
        None => Value::Array(Vec::new()),
        Some((&len, [])) => Value::Array(items.take(len).collect()),
        Some((&len, inner)) => Value::Array((0..len).map(|_| nest(inner, items)).collect()),
    }
}

fn decode(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    match ty.kind() {
        Kind::Array(member) => return decode_array(member, raw),
        Kind::Domain(inner) => return decode(inner, raw),
        Kind::Enum(_) => return Ok(Value::String(std::str::from_utf8(raw)?.to_string())),
        _ => {}
    }

    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => Value::String(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID
        | Type::XID
        | Type::CID
        | Type::REGPROC
        | Type::REGPROCEDURE
        | Type::REGOPER
        | Type::REGOPERATOR
        | Type::REGCLASS
        | Type::REGTYPE
        | Type::REGCONFIG
        | Type::REGDICTIONARY
        | Type::REGNAMESPACE
        | Type::REGROLE => Value::from(u32::from_be_bytes(fixed(raw)?)),
        Type::FLOAT4 => float(f64::from(f32::from_sql(ty, raw)?)),
        Type::FLOAT8 => float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::String(decode_numeric(raw)?),
        Type::MONEY => {
            let cents = i64::from_be_bytes(fixed(raw)?);
            let sign = if cents < 0 { "-" } else { "" };
            let cents = cents.unsigned_abs();
            Value::String(format!("{sign}{}.{:02}", cents / 100, cents % 100))
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML => {
            Value::String(std::str::from_utf8(raw)?.to_string())
        }
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string()),
        Type::TIME => {
            Value::String(NaiveTime::from_sql(ty, raw)?.format("%H:%M:%S%.f").to_string())
        }
        Type::TIMESTAMP => Value::String(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::String(
            DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        Type::INTERVAL => Value::String(decode_interval(raw)?),
        Type::INET | Type::CIDR => Value::String(decode_inet(raw)?),
        _ => Value::String(hex(raw)),
    };
    Ok(value)
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N], BoxError> {
    raw.try_into()
        .map_err(|_| format!("expected {N} bytes, got {}", raw.len()).into())
}

fn float(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn hex(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Exact decimal text of a binary `numeric` (base-10000 digits).
pub fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<u16, BoxError> {
        raw.get(i..i + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| BoxError::from("truncated numeric"))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + 2 * i))
        .collect::<Result<Vec<u16>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit(i));
            } else {
                let _ = write!(out, "{:04}", digit(i));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(i));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    let raw: [u8; 16] = fixed(raw)?;
    let [m0, m1, m2, m3, m4, m5, m6, m7, d0, d1, d2, d3, n0, n1, n2, n3] = raw;
    let micros = i64::from_be_bytes([m0, m1, m2, m3, m4, m5, m6, m7]);
    let days = i32::from_be_bytes([d0, d1, d2, d3]);
    let months = i32::from_be_bytes([n0, n1, n2, n3]);

    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        let _ = write!(out, "{years}Y");
    }
    if months != 0 {
        let _ = write!(out, "{months}M");
    }
    if days != 0 {
        let _ = write!(out, "{days}D");
    }
    if micros != 0 {
        out.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = (micros / 60_000_000) % 60;
        let seconds = micros % 60_000_000;
        if hours != 0 {
            let _ = write!(out, "{hours}H");
        }
        if minutes != 0 {
            let _ = write!(out, "{minutes}M");
        }
        if seconds != 0 {
            let whole = seconds / 1_000_000;
            let fraction = (seconds % 1_000_000).abs();
            if fraction == 0 {
                let _ = write!(out, "{whole}S");
            } else {
                let sign = if seconds < 0 && whole == 0 { "-" } else { "" };
                let fraction = format!("{fraction:06}");
                let _ = write!(out, "{sign}{whole}.{}S", fraction.trim_end_matches('0'));
            }
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    Ok(out)
}

/// `inet`/`cidr`: family, bits, is_cidr, length, address bytes.
fn decode_inet(raw: &[u8]) -> Result<String, BoxError> {
    let (header, addr) = raw.split_at_checked(4).ok_or("truncated inet")?;
    let bits = header[1];
    let is_cidr = header[2] == 1;
    let (ip, full): (std::net::IpAddr, u8) = match addr.len() {
        4 => (<[u8; 4]>::try_from(addr)?.into(), 32),
        16 => (<[u8; 16]>::try_from(addr)?.into(), 128),
        n => return Err(format!("invalid inet address length {n}").into()),
    };
    if is_cidr || bits != full {
        Ok(format!("{ip}/{bits}"))
    } else {
        Ok(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_decoding() {
        assert_eq!(decode_numeric(&numeric(3, 0, 0, 8, &[3, 1415, 9265])).unwrap(), "3.14159265");
        assert_eq!(
            decode_numeric(&numeric(3, 1, NUMERIC_NEG, 1, &[1234, 5678, 9000])).unwrap(),
            "-12345678.9"
        );
        assert_eq!(decode_numeric(&numeric(1, -1, 0, 4, &[1])).unwrap(), "0.0001");
        assert_eq!(decode_numeric(&numeric(1, 1, 0, 0, &[5])).unwrap(), "50000");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(decode_numeric(&numeric(0, 0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_err());
    }

    #[test]
    fn test_scalar_decoding() {
        assert_eq!(decode(&Type::BOOL, &[1]).unwrap(), json!(true));
        assert_eq!(decode(&Type::INT4, &42i32.to_be_bytes()).unwrap(), json!(42));
        assert_eq!(decode(&Type::OID, &1262u32.to_be_bytes()).unwrap(), json!(1262));
        assert_eq!(decode(&Type::TEXT, b"widget").unwrap(), json!("widget"));
        assert_eq!(decode(&Type::MONEY, &(-1234i64).to_be_bytes()).unwrap(), json!("-12.34"));
        assert_eq!(decode(&Type::BYTEA, &[0xde, 0xad]).unwrap(), json!("\\xdead"));
    }

    #[test]
    fn test_date_decoding() {
        // days since 2000-01-01
        assert_eq!(decode(&Type::DATE, &0i32.to_be_bytes()).unwrap(), json!("2000-01-01"));
        let micros: i64 = 86_400_000_000 + 3_723_000_000;
        assert_eq!(
            decode(&Type::TIMESTAMP, &micros.to_be_bytes()).unwrap(),
            json!("2000-01-02T01:02:03")
        );
    }

    #[test]
    fn test_interval_decoding() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(4 * 3_600_000_000i64 + 5_500_000).to_be_bytes());
        raw.extend_from_slice(&3i32.to_be_bytes());
        raw.extend_from_slice(&14i32.to_be_bytes());
        assert_eq!(decode_interval(&raw).unwrap(), "P1Y2M3DT4H5.5S");
        assert_eq!(decode_interval(&[0; 16]).unwrap(), "PT0S");
    }

    #[test]
    fn test_inet_decoding() {
        assert_eq!(decode_inet(&[2, 32, 0, 4, 10, 0, 0, 1]).unwrap(), "10.0.0.1");
        assert_eq!(decode_inet(&[2, 8, 1, 4, 10, 0, 0, 0]).unwrap(), "10.0.0.0/8");
    }

    fn int4_array(dimensions: &[i32], items: &[Option<i32>]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(dimensions.len() as i32).to_be_bytes());
        raw.extend_from_slice(&i32::from(items.iter().any(Option::is_none)).to_be_bytes());
        raw.extend_from_slice(&Type::INT4.oid().to_be_bytes());
        for len in dimensions {
            raw.extend_from_slice(&len.to_be_bytes());
            raw.extend_from_slice(&1i32.to_be_bytes());
        }
        for item in items {
            match item {
                Some(n) => {
                    raw.extend_from_slice(&4i32.to_be_bytes());
                    raw.extend_from_slice(&n.to_be_bytes());
                }
                None => raw.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        raw
    }

    #[test]
    fn test_array_decoding() {
        let flat = int4_array(&[3], &[Some(1), None, Some(3)]);
        assert_eq!(decode(&Type::INT4_ARRAY, &flat).unwrap(), json!([1, null, 3]));

        let grid = int4_array(&[2, 3], &[Some(1), Some(2), Some(3), Some(4), Some(5), Some(6)]);
        assert_eq!(
            decode(&Type::INT4_ARRAY, &grid).unwrap(),
            json!([[1, 2, 3], [4, 5, 6]])
        );

        let empty = int4_array(&[], &[]);
        assert_eq!(decode(&Type::INT4_ARRAY, &empty).unwrap(), json!([]));
    }

    #[test]
    fn test_text_params() {
        assert_eq!(TextParam::from(&json!(null)).as_str(), None);
        assert_eq!(TextParam::from(&json!(1.5)).as_str(), Some("1.5"));
        assert_eq!(TextParam::from(&json!(true)).as_str(), Some("true"));
        assert_eq!(TextParam::from(&json!({"a": 1})).as_str(), Some(r#"{"a":1}"#));
        assert_eq!(
            TextParam::from(&json!(["widget", "say \"hi\"", null, 3])).as_str(),
            Some(r#"{"widget","say \"hi\"",NULL,"3"}"#)
        );
        assert_eq!(array_literal(&[json!([1, 2]), json!([3])]), r#"{{"1","2"},{"3"}}"#);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders").unwrap(), r#""orders""#);
        assert_eq!(quote_ident("public.orders").unwrap(), r#""public"."orders""#);
        assert_eq!(quote_ident(r#"we"ird"#).unwrap(), r#""we""ird""#);
        assert!(quote_ident("public.").is_err());
        assert!(quote_ident("").is_err());
    }
}
