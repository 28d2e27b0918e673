//! SQL identifier quoting, validation and naming conventions.

use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static WORD_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z0-9])([A-Z])|([A-Z]+)([A-Z][a-z])").expect("valid boundary regex")
});

/// Quote a SQL identifier using backticks.
///
/// Embedded backticks are escaped by doubling them. Backticks are understood
/// by MySQL and accepted by SQLite.
///
/// # Examples
///
/// ```
/// use pkmvc_core::quote_ident;
///
/// assert_eq!(quote_ident("post"), "`post`");
/// assert_eq!(quote_ident("odd`name"), "`odd``name`");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Whether `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Derive a table name from a class name.
///
/// # Examples
///
/// ```
/// use pkmvc_core::to_snake_case;
///
/// assert_eq!(to_snake_case("BlogPost"), "blog_post");
/// assert_eq!(to_snake_case("HTMLPage"), "html_page");
/// assert_eq!(to_snake_case("user"), "user");
/// ```
pub fn to_snake_case(name: &str) -> String {
    let mut current = name.to_string();
    // Two passes: overlapping boundaries like "aBC" are only split once per pass.
    for _ in 0..2 {
        current = WORD_BOUNDARY
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                match (caps.get(1), caps.get(2)) {
                    (Some(a), Some(b)) => format!("{}_{}", a.as_str(), b.as_str()),
                    _ => format!("{}_{}", &caps[3], &caps[4]),
                }
            })
            .into_owned();
    }
    current.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("user`name"), "`user``name`");
        assert_eq!(quote_ident(""), "``");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("post_id"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("title; DROP TABLE post"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("Post"), "post");
        assert_eq!(to_snake_case("BlogPost"), "blog_post");
        assert_eq!(to_snake_case("PostComment2"), "post_comment2");
        assert_eq!(to_snake_case("HTMLPage"), "html_page");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }
}
