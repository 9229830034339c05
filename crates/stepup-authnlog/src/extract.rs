//! Record extraction from raw authentication log lines
//!
//! Each line carries an optional prefix added by the upstream logger
//! (timestamp, level, channel) followed by one JSON object. Everything before
//! the first `{` is discarded. The decoded object is kept whole because the
//! fingerprint is computed over all of it, not only the mapped fields.

use serde_json::Value;
use thiserror::Error;

/// Why a non-blank line could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no JSON object found in line")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

/// Authentication log fields persisted for every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SecondFactorId,
    SecondFactorType,
    Institution,
    AuthenticationResult,
    ResultingLoa,
    IdentityId,
    AuthenticatingIdp,
    RequestingSp,
    RequestId,
    Datetime,
}

impl Field {
    pub const COUNT: usize = 10;

    /// All fields in column order
    pub const ALL: [Field; Field::COUNT] = [
        Field::SecondFactorId,
        Field::SecondFactorType,
        Field::Institution,
        Field::AuthenticationResult,
        Field::ResultingLoa,
        Field::IdentityId,
        Field::AuthenticatingIdp,
        Field::RequestingSp,
        Field::RequestId,
        Field::Datetime,
    ];

    /// Plain JSON key, looked up before the prefixed alias
    pub fn key(self) -> &'static str {
        match self {
            Field::SecondFactorId => "second_factor_id",
            Field::SecondFactorType => "second_factor_type",
            Field::Institution => "institution",
            Field::AuthenticationResult => "authentication_result",
            Field::ResultingLoa => "resulting_loa",
            Field::IdentityId => "identity_id",
            Field::AuthenticatingIdp => "authenticating_idp",
            Field::RequestingSp => "requesting_sp",
            Field::RequestId => "request_id",
            Field::Datetime => "datetime",
        }
    }

    /// Column in the `stepup` table, as created by the existing tooling
    /// (the entity-id spellings included)
    pub fn column(self) -> &'static str {
        match self {
            Field::SecondFactorId => "sndf_id",
            Field::SecondFactorType => "sndf_type",
            Field::Institution => "institution",
            Field::AuthenticationResult => "result",
            Field::ResultingLoa => "loa",
            Field::IdentityId => "nameid",
            Field::AuthenticatingIdp => "idp_enityid",
            Field::RequestingSp => "sp_enitytid",
            Field::RequestId => "request_id",
            Field::Datetime => "ts",
        }
    }

    /// Key used by the gateway's GELF-style formatter, which prefixes
    /// context values with `_ctxt_` and the request id with `_`
    pub fn prefixed_key(self) -> &'static str {
        match self {
            Field::SecondFactorId => "_ctxt_second_factor_id",
            Field::SecondFactorType => "_ctxt_second_factor_type",
            Field::Institution => "_ctxt_institution",
            Field::AuthenticationResult => "_ctxt_authentication_result",
            Field::ResultingLoa => "_ctxt_resulting_loa",
            Field::IdentityId => "_ctxt_identity_id",
            Field::AuthenticatingIdp => "_ctxt_authenticating_idp",
            Field::RequestingSp => "_ctxt_requesting_sp",
            Field::RequestId => "_request_id",
            Field::Datetime => "_ctxt_datetime",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Mapped subset of one log record; absent fields stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord {
    values: [Option<String>; Field::COUNT],
}

impl ExtractedRecord {
    /// Apply the field mapping to a decoded payload
    pub fn from_payload(payload: &Value) -> Self {
        let mut record = Self::default();
        for field in Field::ALL {
            record.values[field.index()] = lookup(payload, field);
        }
        record
    }

    /// Set a single field, mostly useful for building records in tests
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.values[field.index()] = Some(value.into());
        self
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    /// Fields paired with their values, in column order
    pub fn iter(&self) -> impl Iterator<Item = (Field, Option<&str>)> + '_ {
        Field::ALL.into_iter().map(|field| (field, self.get(field)))
    }
}

/// A successfully decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// The full decoded JSON object, input to the fingerprint
    pub payload: Value,
    pub record: ExtractedRecord,
}

/// Outcome of extracting a line that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Only whitespace; counted as ignored, not as an error
    Blank,
    Parsed(ParsedLine),
}

/// Extract the embedded JSON record from one raw line
pub fn extract(line: &[u8]) -> Result<Extraction, ExtractError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(Extraction::Blank);
    }

    let start = line
        .iter()
        .position(|&b| b == b'{')
        .ok_or(ExtractError::NoJson)?;

    let payload: Value = serde_json::from_slice(&line[start..])
        .map_err(|e| ExtractError::InvalidJson(e.to_string()))?;

    let record = ExtractedRecord::from_payload(&payload);
    Ok(Extraction::Parsed(ParsedLine { payload, record }))
}

// Plain key wins over the prefixed alias. Null and absent are both stored as
// NULL, scalars as their JSON text, containers as compact JSON.
fn lookup(payload: &Value, field: Field) -> Option<String> {
    let value = match payload.get(field.key()) {
        Some(value) if !value.is_null() => value,
        _ => payload.get(field.prefixed_key())?,
    };

    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        container @ (Value::Array(_) | Value::Object(_)) => Some(container.to_string()),
    }
}
