use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ResponseOk<T: Serialize> {
    pub id: String,
    pub result: T,
}

#[derive(Debug, Serialize)]
pub struct ResponseErr {
    pub id: String,
    pub error: String,
}

pub fn ok<T: Serialize>(id: &str, result: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(ResponseOk {
        id: id.to_string(),
        result,
    })?)
}

pub fn err(id: &str, error: impl Into<String>) -> Value {
    // ResponseErr only holds strings; serialization cannot fail.
    serde_json::to_value(ResponseErr {
        id: id.to_string(),
        error: error.into(),
    })
    .unwrap_or(Value::Null)
}

/// Decode handler params into a typed struct, naming the method on failure.
pub fn parse_params<T: for<'de> Deserialize<'de>>(method: &str, params: &Value) -> anyhow::Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| anyhow::anyhow!("Invalid params for '{method}': {e}"))
}
