//! The replicated command payload: `{"tx": bool, "stmts": [...]}`.
//!
//! Two legacy encodings are still accepted on the parse side: a bare JSON
//! string (single statement, no transaction) and a bare JSON array of
//! statements (implicit transaction when longer than one).

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ServerError;

/// Statement list plus the explicit-transaction flag carried in a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// True when the client delimited the block with `BEGIN … END`.
    pub tx: bool,
    /// Statements in execution order, transaction delimiters excluded.
    pub stmts: Vec<String>,
}

impl Payload {
    pub fn new(tx: bool, stmts: Vec<String>) -> Self {
        Self { tx, stmts }
    }

    /// Whether apply wraps the statements in one engine transaction.
    pub fn wraps(&self) -> bool {
        self.tx || self.stmts.len() > 1
    }

    pub fn encode(&self) -> String {
        // Serialization of a plain struct with string fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Result<Self, ServerError> {
        let value: Value = serde_json::from_str(raw).map_err(|err| ServerError::Payload {
            message: err.to_string(),
        })?;
        match value {
            Value::String(stmt) => Ok(Self::new(false, vec![stmt])),
            Value::Array(items) => {
                let stmts = decode_stmts(items)?;
                Ok(Self::new(false, stmts))
            }
            Value::Object(_) => serde_json::from_value(value).map_err(|err| ServerError::Payload {
                message: err.to_string(),
            }),
            other => Err(ServerError::Payload {
                message: format!("unsupported payload type: {other}"),
            }),
        }
    }
}

fn decode_stmts(items: Vec<Value>) -> Result<Vec<String>, ServerError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(ServerError::Payload {
                message: format!("statement is not a string: {other}"),
            }),
        })
        .collect()
}
