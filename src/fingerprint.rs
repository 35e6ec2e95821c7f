//! Statement fingerprints: SHA-1 of the literal-normalized statement
//! text. Two statements differing only in literal values share a
//! fingerprint.

use sha1::{Digest, Sha1};
use sqlparser::dialect::MySqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Produce the normalized digest text: literals become `?`, keywords
/// are uppercased, whitespace and comments collapse to single spaces.
pub fn digest_text(sql: &str) -> String {
    let dialect = MySqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(t) => t,
        // Untokenizable text digests as-is; the hash is still stable.
        Err(_) => return sql.trim().to_string(),
    };

    let mut out = String::with_capacity(sql.len());
    for tok in tokens {
        let piece = match tok {
            Token::Whitespace(_) => continue,
            Token::Number(_, _)
            | Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::NationalStringLiteral(_)
            | Token::EscapedStringLiteral(_)
            | Token::HexStringLiteral(_) => "?".to_string(),
            Token::Word(w) => {
                if w.keyword != Keyword::NoKeyword && w.quote_style.is_none() {
                    w.value.to_uppercase()
                } else {
                    w.to_string()
                }
            }
            other => other.to_string(),
        };
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&piece);
    }
    out
}

/// 40-hex-char SHA-1 of the digest text.
pub fn sqlsha1(sql: &str) -> String {
    let digest = digest_text(sql);
    let hash = Sha1::digest(digest.as_bytes());
    let mut hex = String::with_capacity(40);
    for b in hash {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}
