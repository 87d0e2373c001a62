//! Hierarchical subject addressing
//!
//! Subjects are dot-separated tokens. Patterns may contain `*`, matching
//! exactly one token, and a trailing `>`, matching one or more tokens.
//!
//! ```text
//! <namespace>.data.>              all ingestion topics
//! <namespace>.data.system.>       system metrics only
//! <namespace>.data.<src>.<cat>    publication subject
//! ```

/// Pattern matching every ingestion topic
pub fn ingest_pattern(namespace: &str) -> String {
    format!("{namespace}.data.>")
}

/// Pattern matching only system-metric topics
pub fn system_pattern(namespace: &str) -> String {
    format!("{namespace}.data.system.>")
}

/// Subject an event with the given source and category is published on
pub fn publish_subject(namespace: &str, source: &str, category: &str) -> String {
    format!(
        "{namespace}.data.{}.{}",
        sanitize_token(source),
        sanitize_token(category)
    )
}

/// Turn free text into a single subject token
///
/// Separators and wildcards would change the hierarchy, so they are replaced.
pub fn sanitize_token(raw: &str) -> String {
    let token: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if token.is_empty() {
        "unknown".to_string()
    } else {
        token
    }
}

/// Whether a concrete subject is matched by a pattern
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            // `>` needs at least one remaining token
            (Some(">"), Some(token)) => return !token.is_empty(),
            (Some("*"), Some(token)) if !token.is_empty() => continue,
            (Some(expected), Some(token)) if expected == token && !token.is_empty() => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
