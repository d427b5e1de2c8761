//! Command reply values, mirroring the Redis reply conventions the wire
//! protocol speaks: simple strings, bulk strings, integers, arrays, and nil.

use crate::db::Rows;

/// A value returned to the client. Errors are not a variant; they travel as
/// `Result::Err` until the front-end writes the error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status line, e.g. `OK` / `PONG`.
    Simple(String),
    /// Binary-safe string.
    Bulk(String),
    Integer(i64),
    Array(Vec<Reply>),
    Nil,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// One statement's rows as an array of arrays of bulk strings.
    pub fn from_rows(rows: Rows) -> Self {
        Reply::Array(
            rows.into_iter()
                .map(|row| Reply::Array(row.into_iter().map(Reply::Bulk).collect()))
                .collect(),
        )
    }

    /// A full result envelope: one entry per statement.
    pub fn from_result_sets(sets: Vec<Rows>) -> Self {
        Reply::Array(sets.into_iter().map(Reply::from_rows).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result_sets_shape() {
        let sets = vec![
            vec![],
            vec![vec!["a".to_string()], vec!["1".to_string()]],
        ];
        let reply = Reply::from_result_sets(sets);
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Array(vec![]),
                Reply::Array(vec![
                    Reply::Array(vec![Reply::Bulk("a".into())]),
                    Reply::Array(vec![Reply::Bulk("1".into())]),
                ]),
            ])
        );
    }
}
