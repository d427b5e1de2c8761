//! Command classification and rewriting.
//!
//! The catch-all SQL path is passive: it never touches the database itself.
//! It splits the request into statements, applies the transaction-shape
//! rules, and rewrites the block into one of the internal replicated
//! primitives (`$EXEC` for writes, `$QUERY` for reads) carrying the
//! canonical JSON payload. The consensus layer decides what happens to the
//! rewrite; malformed input never gets that far.

use crate::error::ServerError;
use crate::machine::Payload;
use crate::reply::Reply;
use crate::session::Validator;
use crate::sql;
use crate::sql::StatementClass;

/// Outcome of classifying one inbound SQL request.
#[derive(Debug, PartialEq, Eq)]
pub enum Routed {
    /// Answerable without touching the database.
    Immediate(Reply),
    /// Read-only block: execute locally as `$QUERY <payload>`.
    Query { payload: String },
    /// Mutating block: replicate as `$EXEC <payload>`.
    Exec { payload: String },
}

/// Classify a raw SQL request and rewrite it for the apply path.
///
/// Transaction-shape rules: `begin` must be the first statement and stand
/// alone; `end`/`commit`/`rollback` must be the last; nesting is refused; a
/// `begin` block must be closed within the same request.
pub fn route_sql(raw: &str, validator: Option<&Validator>) -> Result<Routed, ServerError> {
    let mut stmts: Vec<String> = Vec::new();
    let mut txbegan = false;
    let mut txended = false;
    let mut any_write = false;
    let mut failure: Option<ServerError> = None;

    let complete = sql::split_statements(raw.trim(), |stmt| {
        let kw = sql::keyword(stmt);
        let step = match sql::classify(&kw) {
            StatementClass::TxBegin => {
                if txended {
                    Err(ServerError::EndNotLast)
                } else if txbegan {
                    Err(ServerError::NestedTransaction)
                } else if !stmts.is_empty() {
                    Err(ServerError::BeginNotFirst)
                } else if stmt.len() > kw.len() {
                    Err(ServerError::TooMuchInput)
                } else {
                    txbegan = true;
                    Ok(())
                }
            }
            StatementClass::TxEnd => {
                if txended {
                    Err(ServerError::EndNotLast)
                } else if !txbegan {
                    Err(ServerError::TransactionNotStarted)
                } else if stmt.len() > kw.len() {
                    Err(ServerError::TooMuchInput)
                } else {
                    txended = true;
                    Ok(())
                }
            }
            StatementClass::Read => {
                if txended {
                    Err(ServerError::EndNotLast)
                } else {
                    stmts.push(stmt.to_string());
                    Ok(())
                }
            }
            StatementClass::Write => {
                if txended {
                    Err(ServerError::EndNotLast)
                } else {
                    any_write = true;
                    stmts.push(stmt.to_string());
                    Ok(())
                }
            }
            StatementClass::Unknown => Err(ServerError::Syntax { near: kw }),
        };
        match step {
            Ok(()) => true,
            Err(err) => {
                failure = Some(err);
                false
            }
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }
    if !complete && stmts.is_empty() && !txbegan {
        return Err(ServerError::IncompleteInput);
    }
    if txbegan && !txended {
        return Err(ServerError::MissingEnd);
    }
    if stmts.is_empty() && !txbegan {
        return Ok(Routed::Immediate(Reply::Array(Vec::new())));
    }

    if let Some(validator) = validator {
        for stmt in &stmts {
            validator.validate(stmt)?;
        }
    }

    let payload = Payload::new(txbegan, stmts).encode();
    Ok(if any_write {
        Routed::Exec { payload }
    } else {
        Routed::Query { payload }
    })
}
