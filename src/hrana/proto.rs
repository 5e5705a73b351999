//! Wire structures for Hrana over HTTP. Requests deserialize from JSON, responses serialize
//! to JSON; protobuf encoding is deliberately not supported.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct PipelineReqBody {
    #[serde(default)]
    pub baton: Option<String>,
    pub requests: Vec<StreamRequest>,
}

#[derive(Serialize, Debug)]
pub struct PipelineRespBody {
    pub baton: Option<String>,
    pub base_url: Option<String>,
    pub results: Vec<StreamResult>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: Error },
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    Close(CloseStreamReq),
    Execute(ExecuteStreamReq),
    Batch(BatchStreamReq),
    Sequence(SequenceStreamReq),
    Describe(DescribeStreamReq),
    StoreSql(StoreSqlStreamReq),
    CloseSql(CloseSqlStreamReq),
    GetAutocommit(GetAutocommitStreamReq),
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamResponse {
    Close(CloseStreamResp),
    Execute(ExecuteStreamResp),
    Batch(BatchStreamResp),
    Sequence(SequenceStreamResp),
    Describe(DescribeStreamResp),
    StoreSql(StoreSqlStreamResp),
    CloseSql(CloseSqlStreamResp),
    GetAutocommit(GetAutocommitStreamResp),
}

#[derive(Deserialize, Debug)]
pub struct CloseStreamReq {}

#[derive(Serialize, Debug)]
pub struct CloseStreamResp {}

#[derive(Deserialize, Debug)]
pub struct ExecuteStreamReq {
    pub stmt: Stmt,
}

#[derive(Serialize, Debug)]
pub struct ExecuteStreamResp {
    pub result: StmtResult,
}

#[derive(Deserialize, Debug)]
pub struct BatchStreamReq {
    pub batch: Batch,
}

#[derive(Serialize, Debug)]
pub struct BatchStreamResp {
    pub result: BatchResult,
}

#[derive(Deserialize, Debug)]
pub struct SequenceStreamReq {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub sql_id: Option<i32>,
}

#[derive(Serialize, Debug)]
pub struct SequenceStreamResp {}

#[derive(Deserialize, Debug)]
pub struct DescribeStreamReq {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub sql_id: Option<i32>,
}

#[derive(Serialize, Debug)]
pub struct DescribeStreamResp {
    pub result: DescribeResult,
}

#[derive(Deserialize, Debug)]
pub struct StoreSqlStreamReq {
    pub sql_id: i32,
    pub sql: String,
}

#[derive(Serialize, Debug)]
pub struct StoreSqlStreamResp {}

#[derive(Deserialize, Debug)]
pub struct CloseSqlStreamReq {
    pub sql_id: i32,
}

#[derive(Serialize, Debug)]
pub struct CloseSqlStreamResp {}

#[derive(Deserialize, Debug)]
pub struct GetAutocommitStreamReq {}

#[derive(Serialize, Debug)]
pub struct GetAutocommitStreamResp {
    pub is_autocommit: bool,
}

#[derive(Clone, Serialize, Debug)]
pub struct Error {
    pub message: String,
    pub code: String,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct Stmt {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub sql_id: Option<i32>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, deserialize_with = "named_args::deserialize")]
    pub named_args: Vec<NamedArg>,
    #[serde(default)]
    pub want_rows: Option<bool>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct NamedArg {
    pub name: String,
    pub value: Value,
}

#[derive(Serialize, Debug, Default)]
pub struct StmtResult {
    pub cols: Vec<Col>,
    pub rows: Vec<Vec<Value>>,
    pub affected_row_count: u64,
    #[serde(with = "option_i64_as_str")]
    pub last_insert_rowid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_duration_ms: Option<f64>,
}

#[derive(Clone, Serialize, Debug)]
pub struct Col {
    pub name: Option<String>,
    pub decltype: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Batch {
    pub steps: Vec<BatchStep>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct BatchStep {
    #[serde(default)]
    pub condition: Option<BatchCond>,
    pub stmt: Stmt,
}

#[derive(Serialize, Debug, Default)]
pub struct BatchResult {
    pub step_results: Vec<Option<StmtResult>>,
    pub step_errors: Vec<Option<Error>>,
}

#[derive(Clone, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchCond {
    Ok { step: u32 },
    Error { step: u32 },
    Not { cond: Box<BatchCond> },
    And { conds: Vec<BatchCond> },
    Or { conds: Vec<BatchCond> },
    IsAutocommit {},
}

#[derive(Serialize, Debug)]
pub struct DescribeResult {
    pub params: Vec<DescribeParam>,
    pub cols: Vec<DescribeCol>,
    pub is_explain: bool,
    pub is_readonly: bool,
}

#[derive(Serialize, Debug)]
pub struct DescribeParam {
    pub name: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct DescribeCol {
    pub name: String,
    pub decltype: Option<String>,
}

/// A value in the protocol's tagged encoding.
///
/// Serialization always produces the tagged `{type, value}` shape, with integers rendered as
/// decimal strings so that the full 64-bit range survives JSON. Deserialization is more
/// liberal: see [`Value::decode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer {
        #[serde(with = "i64_as_str")]
        value: i64,
    },
    Float {
        value: f64,
    },
    Text {
        value: String,
    },
    Blob {
        #[serde(with = "bytes_as_base64", rename = "base64")]
        value: Bytes,
    },
}

impl Value {
    /// Decodes a value from its wire representation. Raw JSON scalars are taken directly; an
    /// object is dispatched on its `type` tag. Integers are accepted both as JSON numbers and
    /// as decimal strings.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, String> {
        use serde_json::Value as Json;

        let value = match raw {
            Json::Null => Value::Null,
            Json::String(s) => Value::Text { value: s.clone() },
            Json::Number(n) => {
                if let Some(value) = n.as_i64() {
                    Value::Integer { value }
                } else if let Some(value) = n.as_f64() {
                    Value::Float { value }
                } else {
                    return Err(format!("number {n} is out of range"));
                }
            }
            Json::Object(fields) => {
                let type_ = fields
                    .get("type")
                    .and_then(Json::as_str)
                    .ok_or_else(|| "value object is missing a `type` field".to_string())?;
                match type_ {
                    "null" => Value::Null,
                    "integer" => {
                        let value = fields
                            .get("value")
                            .ok_or_else(|| "integer value is missing `value`".to_string())?;
                        let value = match value {
                            Json::Number(n) => n
                                .as_i64()
                                .ok_or_else(|| format!("integer {n} is out of range"))?,
                            Json::String(s) => s
                                .parse()
                                .map_err(|_| format!("`{s}` is not a decimal integer"))?,
                            other => return Err(format!("invalid integer value: {other}")),
                        };
                        Value::Integer { value }
                    }
                    "float" => {
                        let value = fields
                            .get("value")
                            .and_then(Json::as_f64)
                            .ok_or_else(|| "float value is missing a numeric `value`".to_string())?;
                        Value::Float { value }
                    }
                    "text" => {
                        let value = fields
                            .get("value")
                            .and_then(Json::as_str)
                            .ok_or_else(|| "text value is missing a string `value`".to_string())?;
                        Value::Text {
                            value: value.to_owned(),
                        }
                    }
                    "blob" => {
                        let b64 = fields
                            .get("base64")
                            .or_else(|| fields.get("value"))
                            .and_then(Json::as_str)
                            .ok_or_else(|| "blob value is missing a `base64` field".to_string())?;
                        Value::Blob {
                            value: decode_base64(b64)?,
                        }
                    }
                    other => return Err(format!("unknown value type `{other}`")),
                }
            }
            other => return Err(format!("invalid value: {other}")),
        };

        Ok(value)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(de)?;
        Value::decode(&raw).map_err(serde::de::Error::custom)
    }
}

fn decode_base64(text: &str) -> Result<Bytes, String> {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine as _;

    let text = text.trim_end_matches('=');
    let bytes = STANDARD_NO_PAD
        .decode(text)
        .map_err(|_| format!("`{text}` is not valid base64"))?;
    Ok(Bytes::from(bytes))
}

mod i64_as_str {
    use serde::{ser, Serialize as _};

    pub fn serialize<S: ser::Serializer>(value: &i64, ser: S) -> Result<S::Ok, S::Error> {
        value.to_string().serialize(ser)
    }
}

mod option_i64_as_str {
    use serde::{ser, Serialize as _};

    pub fn serialize<S: ser::Serializer>(value: &Option<i64>, ser: S) -> Result<S::Ok, S::Error> {
        value.map(|v| v.to_string()).serialize(ser)
    }
}

mod bytes_as_base64 {
    use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
    use bytes::Bytes;
    use serde::{ser, Serialize as _};

    pub fn serialize<S: ser::Serializer>(value: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
        STANDARD_NO_PAD.encode(value).serialize(ser)
    }
}

/// Named arguments arrive either as a list of `{name, value}` pairs or, in the hrana 2 style,
/// as a plain mapping from name to value. Both normalize to a list.
mod named_args {
    use serde::de::Error as _;
    use serde::Deserialize;

    use super::{NamedArg, Value};

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        de: D,
    ) -> Result<Vec<NamedArg>, D::Error> {
        let raw = serde_json::Value::deserialize(de)?;
        match raw {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    let fields = item
                        .as_object()
                        .ok_or_else(|| D::Error::custom("named argument must be an object"))?;
                    let name = fields
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| D::Error::custom("named argument is missing `name`"))?;
                    let value = fields
                        .get("value")
                        .ok_or_else(|| D::Error::custom("named argument is missing `value`"))?;
                    Ok(NamedArg {
                        name: name.to_owned(),
                        value: Value::decode(value).map_err(D::Error::custom)?,
                    })
                })
                .collect(),
            serde_json::Value::Object(fields) => fields
                .into_iter()
                .map(|(name, value)| {
                    Ok(NamedArg {
                        name,
                        value: Value::decode(&value).map_err(D::Error::custom)?,
                    })
                })
                .collect(),
            _ => Err(D::Error::custom(
                "named arguments must be a list or a mapping",
            )),
        }
    }
}
