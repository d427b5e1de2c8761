//! SQL statement splitting and keyword classification.
//!
//! The splitter is a byte scanner over a semicolon-separated block: it strips
//! comments, respects quoted literals and bracketed identifiers, and yields
//! trimmed non-empty statements in order. It reports whether the input ended
//! outside any open construct so callers can distinguish a finished block
//! from one cut off mid-literal.

/// Statement category used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    /// Serviceable from a read-only handle.
    Read,
    /// Mutates the database; must be replicated.
    Write,
    /// `begin`.
    TxBegin,
    /// `end`, `commit`, or `rollback`.
    TxEnd,
    /// Not in the routing table; rejected as a syntax error.
    Unknown,
}

/// Return the leading run of ASCII letters, lower-cased.
pub fn keyword(sql: &str) -> String {
    let end = sql
        .bytes()
        .position(|b| !b.is_ascii_alphabetic())
        .unwrap_or(sql.len());
    sql[..end].to_ascii_lowercase()
}

/// Classify a statement by its leading keyword.
pub fn classify(keyword: &str) -> StatementClass {
    match keyword {
        "alter" | "analyze" | "attach" | "create" | "delete" | "detach" | "drop" | "indexed"
        | "insert" | "on" | "reindex" | "replace" | "update" | "upsert" | "with" => {
            StatementClass::Write
        }
        "explain" | "select" => StatementClass::Read,
        "begin" => StatementClass::TxBegin,
        "end" | "commit" | "rollback" => StatementClass::TxEnd,
        _ => StatementClass::Unknown,
    }
}

/// Iterate over each statement in a semicolon-separated block.
///
/// Comments are replaced by a single space in the yielded text. The consumer
/// returns `false` to abort the iteration. The return value is `true` only
/// when the input ended outside any open comment, literal, or bracket and the
/// consumer ran to completion (a line comment is closed by end of input).
pub fn split_statements<F>(input: &str, mut emit: F) -> bool
where
    F: FnMut(&str) -> bool,
{
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut complete = true;
    // Spliced text of the current statement, populated only once a comment
    // forces a copy; otherwise statements are sliced straight from the input.
    let mut spliced = String::new();
    let mut seg_start = 0usize;
    let mut i = 0usize;

    let flush = |spliced: &mut String, seg: &str, emit: &mut F| -> bool {
        let stmt;
        let owned;
        if spliced.is_empty() {
            stmt = seg.trim();
        } else {
            spliced.push_str(seg);
            owned = std::mem::take(spliced);
            stmt = owned.trim();
        }
        if stmt.is_empty() {
            return true;
        }
        emit(stmt)
    };

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                spliced.push_str(&input[seg_start..i]);
                spliced.push(' ');
                i += 2;
                let mut closed = false;
                while i < len {
                    if bytes[i] == b'*' && i + 1 < len && bytes[i + 1] == b'/' {
                        i += 2;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    complete = false;
                }
                seg_start = i;
            }
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                spliced.push_str(&input[seg_start..i]);
                spliced.push(' ');
                i += 2;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                if i < len {
                    i += 1;
                }
                seg_start = i;
            }
            q @ (b'\'' | b'"' | b'`') => {
                i += 1;
                let mut closed = false;
                while i < len {
                    if bytes[i] == q {
                        if i + 1 < len && bytes[i + 1] == q {
                            // Doubled quote: embedded, literal stays open.
                            i += 2;
                            continue;
                        }
                        i += 1;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    complete = false;
                }
            }
            b'[' => {
                i += 1;
                let mut closed = false;
                while i < len {
                    if bytes[i] == b']' {
                        i += 1;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    complete = false;
                }
            }
            b';' => {
                if !flush(&mut spliced, &input[seg_start..i], &mut emit) {
                    return false;
                }
                i += 1;
                seg_start = i;
            }
            _ => {
                i += 1;
            }
        }
    }
    if !flush(&mut spliced, &input[seg_start..len], &mut emit) {
        return false;
    }
    complete
}

/// Collect all statements of a block, also reporting completeness.
pub fn collect_statements(input: &str) -> (Vec<String>, bool) {
    let mut stmts = Vec::new();
    let complete = split_statements(input, |s| {
        stmts.push(s.to_string());
        true
    });
    (stmts, complete)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(input: &str) -> (Vec<String>, bool) {
        collect_statements(input)
    }

    #[test]
    fn test_split_basic() {
        let (stmts, complete) = split("SELECT 1; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
        assert!(complete);
    }

    #[test]
    fn test_split_discards_whitespace_fragments() {
        let (stmts, complete) = split(" ;;  ; SELECT 1 ;; ");
        assert_eq!(stmts, vec!["SELECT 1"]);
        assert!(complete);
    }

    #[test]
    fn test_split_trailing_line_comment_is_complete() {
        let (stmts, complete) = split("SELECT 1; -- trailing\n");
        assert_eq!(stmts, vec!["SELECT 1"]);
        assert!(complete);
    }

    #[test]
    fn test_split_line_comment_without_newline() {
        let (stmts, complete) = split("SELECT 1 -- tail");
        assert_eq!(stmts, vec!["SELECT 1"]);
        assert!(complete);
    }

    #[test]
    fn test_split_block_comment_stripped() {
        let (stmts, complete) = split("SELECT /* name */ 1; /* whole */");
        assert_eq!(stmts, vec!["SELECT   1"]);
        assert!(complete);
    }

    #[test]
    fn test_split_unclosed_block_comment() {
        let (stmts, complete) = split("SELECT 1; /* open");
        assert_eq!(stmts, vec!["SELECT 1"]);
        assert!(!complete);
    }

    #[test]
    fn test_split_unclosed_quote() {
        let (stmts, complete) = split("SELECT '");
        assert_eq!(stmts, vec!["SELECT '"]);
        assert!(!complete);
    }

    #[test]
    fn test_split_semicolon_inside_literal() {
        let (stmts, complete) = split("INSERT INTO t VALUES ('a;b'); SELECT 1;");
        assert_eq!(stmts, vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]);
        assert!(complete);
    }

    #[test]
    fn test_split_doubled_quote_stays_inside_literal() {
        let (stmts, complete) = split("SELECT 'it''s; fine'; SELECT 2");
        assert_eq!(stmts, vec!["SELECT 'it''s; fine'", "SELECT 2"]);
        assert!(complete);
    }

    #[test]
    fn test_split_bracketed_identifier() {
        let (stmts, complete) = split("SELECT [a;b] FROM t;");
        assert_eq!(stmts, vec!["SELECT [a;b] FROM t"]);
        assert!(complete);

        let (stmts, complete) = split("SELECT [open");
        assert_eq!(stmts, vec!["SELECT [open"]);
        assert!(!complete);
    }

    #[test]
    fn test_split_backtick_and_double_quote() {
        let (stmts, complete) = split("SELECT `a;b`, \"c;d\" FROM t;");
        assert_eq!(stmts, vec!["SELECT `a;b`, \"c;d\" FROM t"]);
        assert!(complete);
    }

    #[test]
    fn test_split_abort_stops_iteration() {
        let mut seen = Vec::new();
        let complete = split_statements("SELECT 1; SELECT 2; SELECT 3;", |s| {
            seen.push(s.to_string());
            seen.len() < 2
        });
        assert_eq!(seen, vec!["SELECT 1", "SELECT 2"]);
        assert!(!complete);
    }

    #[test]
    fn test_keyword() {
        assert_eq!(keyword("SELECT * FROM t"), "select");
        assert_eq!(keyword("select"), "select");
        assert_eq!(keyword("Insert/*x*/"), "insert");
        assert_eq!(keyword("123"), "");
        assert_eq!(keyword(""), "");
    }

    #[test]
    fn test_classify_routing_table() {
        for kw in [
            "alter", "analyze", "attach", "create", "delete", "detach", "drop", "indexed",
            "insert", "on", "reindex", "replace", "update", "upsert", "with",
        ] {
            assert_eq!(classify(kw), StatementClass::Write, "{kw}");
        }
        assert_eq!(classify("select"), StatementClass::Read);
        assert_eq!(classify("explain"), StatementClass::Read);
        assert_eq!(classify("begin"), StatementClass::TxBegin);
        assert_eq!(classify("end"), StatementClass::TxEnd);
        assert_eq!(classify("commit"), StatementClass::TxEnd);
        assert_eq!(classify("rollback"), StatementClass::TxEnd);
        assert_eq!(classify("vacuum"), StatementClass::Unknown);
        assert_eq!(classify(""), StatementClass::Unknown);
    }
}
