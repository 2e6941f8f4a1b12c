use sha2::{Digest, Sha256};

/// Normalize SQL text so formatting-only edits hash identically: strip
/// `--` and `/* */` comments, collapse whitespace, uppercase.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        // line comment
        if c == '-' && chars.peek() == Some(&'-') {
            for n in chars.by_ref() {
                if n == '\n' {
                    break;
                }
            }
            pending_space = true;
            continue;
        }
        // block comment
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for n in chars.by_ref() {
                if prev == '*' && n == '/' {
                    break;
                }
                prev = n;
            }
            pending_space = true;
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for u in c.to_uppercase() {
            out.push(u);
        }
    }

    out
}

pub fn content_hash(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_sql(sql).as_bytes());
    hex::encode(hasher.finalize())
}
