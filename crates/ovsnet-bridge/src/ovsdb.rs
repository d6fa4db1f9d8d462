//! Parsing of `ovs-vsctl get` output.
//!
//! Scalars come back bare or double-quoted (`"abc"`, `5`, `[]`), maps as
//! `{key=value, "quoted key"="quoted, value"}`.

use std::collections::HashMap;

/// Strips one pair of surrounding double quotes and undoes `\"` / `\\`.
pub fn unquote(raw: &str) -> String {
    let s = raw.trim();
    let inner = match s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => inner,
        None => return s.to_string(),
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits `s` on `sep` outside double-quoted sections.
fn split_unquoted(s: &str, sep: char, limit: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes && parts.len() + 1 < limit => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Parses an OVSDB map column.
///
/// Elements without `=` are skipped.
pub fn parse_map(raw: &str) -> HashMap<String, String> {
    let body = raw.trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body);

    split_unquoted(body, ',', usize::MAX)
        .into_iter()
        .filter_map(|elem| {
            let kv = split_unquoted(elem.trim(), '=', 2);
            match kv.as_slice() {
                [k, v] => Some((unquote(k), unquote(v))),
                _ => None,
            }
        })
        .collect()
}

/// Parses an `ofport` value; unassigned (`[]`) and negative ports yield
/// `None`.
pub fn parse_ofport(raw: &str) -> Option<u32> {
    let value = unquote(raw);
    let n: i64 = value.parse().ok()?;
    u32::try_from(n).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"0000aabbccddeeff\"\n"), "0000aabbccddeeff");
        assert_eq!(unquote("gre"), "gre");
        assert_eq!(unquote("\"a\\\"b\""), "a\"b");
        assert_eq!(unquote("\"\""), "");
    }

    #[test]
    fn test_parse_map() {
        let map = parse_map(
            "{attached-mac=\"fa:16:3e:11:22:33\", iface-id=\"9f1c\", iface-status=active}",
        );
        assert_eq!(map.len(), 3);
        assert_eq!(map["attached-mac"], "fa:16:3e:11:22:33");
        assert_eq!(map["iface-id"], "9f1c");
        assert_eq!(map["iface-status"], "active");
    }

    #[test]
    fn test_parse_map_quoted_separators() {
        let map = parse_map("{note=\"a, b=c\", key=flow}");
        assert_eq!(map["note"], "a, b=c");
        assert_eq!(map["key"], "flow");
    }

    #[test]
    fn test_parse_empty_map() {
        assert!(parse_map("{}").is_empty());
        assert!(parse_map("").is_empty());
        assert!(parse_map("{garbage}").is_empty());
    }

    #[test]
    fn test_parse_ofport() {
        assert_eq!(parse_ofport("5"), Some(5));
        assert_eq!(parse_ofport("-1"), None);
        assert_eq!(parse_ofport("[]"), None);
        assert_eq!(parse_ofport(""), None);
    }
}
