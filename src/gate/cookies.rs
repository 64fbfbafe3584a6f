//! Opaque cookie parsing.
//!
//! The gate treats every cookie as opaque bytes: no session framework, no
//! decoding of values. Splitting follows the `Cookie:` header grammar
//! loosely (semicolon-separated `name=value` pairs, whitespace trimmed);
//! pairs without `=` are ignored. On duplicate names the first occurrence
//! wins, matching how user agents order the most specific cookie first.

use std::collections::HashMap;

/// Parse one or more `Cookie:` header values into a name/value map.
pub fn parse<'a, I>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut cookies = HashMap::new();

    for header in headers {
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_pairs() {
        let cookies = parse(["a=1; b=2;c=3"]);
        assert_eq!(cookies["a"], "1");
        assert_eq!(cookies["b"], "2");
        assert_eq!(cookies["c"], "3");
    }

    #[test]
    fn values_keep_embedded_equals() {
        let cookies = parse(["tok=abc=def=="]);
        assert_eq!(cookies["tok"], "abc=def==");
    }

    #[test]
    fn first_occurrence_wins() {
        let cookies = parse(["a=first; a=second"]);
        assert_eq!(cookies["a"], "first");

        let cookies = parse(["a=first", "a=second"]);
        assert_eq!(cookies["a"], "first");
    }

    #[test]
    fn garbage_is_skipped() {
        let cookies = parse(["; ;=;noequals; ok=yes"]);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies["ok"], "yes");
    }

    #[test]
    fn empty_value_kept() {
        let cookies = parse(["gone="]);
        assert_eq!(cookies["gone"], "");
    }
}
