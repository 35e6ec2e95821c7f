//! Text-level SQL utilities: statement splitting and marker-comment
//! stripping. Splitting must be quote- and comment-aware so a parse
//! failure in one statement never derails the rest of the batch.

/// Split a multi-statement query text on top-level `;`.
///
/// Respects single/double-quoted strings (with `''`/`""` doubling and
/// backslash escapes), backtick identifiers, `/* */` comments and
/// `-- `/`#` line comments. The trailing piece is returned even
/// without a terminating `;`; whitespace-only pieces are dropped.
pub fn split_statements(query: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    let bytes = query.as_bytes();
    let mut i = 0;

    #[derive(PartialEq)]
    enum St {
        Plain,
        Single,
        Double,
        Backtick,
        BlockComment,
        LineComment,
    }
    let mut st = St::Plain;

    while i < bytes.len() {
        let c = bytes[i];
        match st {
            St::Plain => match c {
                b'\'' => st = St::Single,
                b'"' => st = St::Double,
                b'`' => st = St::Backtick,
                b'#' => st = St::LineComment,
                b'-' if bytes.get(i + 1) == Some(&b'-')
                    && matches!(bytes.get(i + 2), None | Some(b' ') | Some(b'\t') | Some(b'\n')) =>
                {
                    st = St::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    st = St::BlockComment;
                    i += 1;
                }
                b';' => {
                    let piece = &query[last..i];
                    if !piece.trim().is_empty() {
                        out.push(piece);
                    }
                    last = i + 1;
                }
                _ => {}
            },
            St::Single => match c {
                b'\\' => i += 1,
                b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 1,
                b'\'' => st = St::Plain,
                _ => {}
            },
            St::Double => match c {
                b'\\' => i += 1,
                b'"' if bytes.get(i + 1) == Some(&b'"') => i += 1,
                b'"' => st = St::Plain,
                _ => {}
            },
            St::Backtick => {
                if c == b'`' {
                    st = St::Plain;
                }
            }
            St::BlockComment => {
                if c == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    st = St::Plain;
                    i += 1;
                }
            }
            St::LineComment => {
                if c == b'\n' {
                    st = St::Plain;
                }
            }
        }
        i += 1;
    }

    let piece = &query[last..];
    if !piece.trim().is_empty() {
        out.push(piece);
    }
    out
}

/// Return the first leading `/* ... */` comment of `query`, if any.
pub fn leading_comment(query: &str) -> Option<&str> {
    let t = query.trim_start();
    let rest = t.strip_prefix("/*")?;
    let end = rest.find("*/")?;
    Some(&t[..end + 4])
}

/// Does the first comment of `query` contain `needle`
/// (case-insensitive)?
pub fn first_comment_contains(query: &str, needle: &str) -> bool {
    match leading_comment(query) {
        Some(c) => c.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()),
        None => false,
    }
}

/// Strip a leading marker comment from statement text. Only comments
/// carrying the batch-open sentinel are stripped; ordinary leading
/// comments (optimizer hints etc.) are preserved.
pub fn strip_marker_comment(sql: &str) -> &str {
    let t = sql.trim_start();
    if let Some(comment) = leading_comment(t) {
        if comment.to_ascii_lowercase().contains("magic_start") {
            return t[comment.len()..].trim_start();
        }
    }
    t
}

/// Truncate statement text at the first top-level `;` — used when a
/// parse failure leaves the whole remaining batch in the buffer and
/// only the failed statement should be reported.
pub fn first_statement(sql: &str) -> &str {
    match split_statements(sql).first() {
        Some(s) => s,
        None => sql,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_top_level_semicolons() {
        let parts = split_statements("SELECT 1; SELECT 2;\nSELECT 3");
        assert_eq!(parts, vec!["SELECT 1", " SELECT 2", "\nSELECT 3"]);
    }

    #[test]
    fn ignores_semicolons_in_strings_and_comments() {
        let parts = split_statements(
            "INSERT INTO t VALUES ('a;b', \"c;d\"); -- trailing; comment\nSELECT `w;x` FROM t /* ; */;",
        );
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("'a;b'"));
        assert!(parts[1].contains("`w;x`"));
    }

    #[test]
    fn escaped_quote_does_not_close_string() {
        let parts = split_statements(r"SELECT 'it\'s;fine'; SELECT 2");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn marker_comment_is_stripped() {
        let sql = "/*--host=h;magic_start;*/ CREATE TABLE t (id INT)";
        assert_eq!(strip_marker_comment(sql), "CREATE TABLE t (id INT)");
        // Non-marker comments stay.
        let hint = "/*+ HINT */ SELECT 1";
        assert_eq!(strip_marker_comment(hint), hint);
    }

    #[test]
    fn first_comment_detection() {
        assert!(first_comment_contains(
            "  /* MAGIC_START; */ SELECT 1",
            "magic_start"
        ));
        assert!(!first_comment_contains("SELECT 1 /* magic_start */", "magic_start"));
    }
}
