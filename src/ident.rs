//! Validation and escaping rules for table, symbol, and column names, and for
//! the unquoted text that appears before the designated timestamp on an ILP
//! line.

use crate::error::{Error, Result};

/// Characters forbidden anywhere in a table name, beyond the generic control
/// character and U+FEFF checks below.
const TABLE_NAME_FORBIDDEN: &[char] = &[
    '?', ',', '\'', '"', '\\', '/', ':', '(', ')', '+', '*', '%', '~', '\r', '\n',
];

/// Column/symbol names forbid everything a table name does, plus `-` and `.`.
const COLUMN_NAME_FORBIDDEN: &[char] = &[
    '?', ',', '\'', '"', '\\', '/', ':', '(', ')', '+', '*', '%', '~', '\r', '\n', '-', '.',
];

fn validate_name(name: &str, forbidden: &[char], max_name_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name("name cannot be empty"));
    }
    if name.len() > max_name_len {
        return Err(Error::invalid_name(format!(
            "name length {} exceeds max_name_len {}: {:?}",
            name.len(),
            max_name_len,
            name
        )));
    }
    for (i, c) in name.chars().enumerate() {
        if forbidden.contains(&c) {
            return Err(Error::invalid_name(format!(
                "name {:?} contains forbidden character {:?}",
                name, c
            )));
        }
        if (c as u32) < 0x20 || (c as u32) == 0x7f || c == '\u{feff}' {
            return Err(Error::invalid_name(format!(
                "name {:?} contains a non-printable character at position {}",
                name, i
            )));
        }
        if c == '.' && (i == 0 || i == name.chars().count() - 1) {
            return Err(Error::invalid_name(format!(
                "name {:?} cannot start or end with a dot",
                name
            )));
        }
    }
    if name.contains("..") {
        return Err(Error::invalid_name(format!(
            "name {:?} cannot contain adjacent dots",
            name
        )));
    }
    Ok(())
}

/// Validates a table name per the ILP grammar (dots are allowed, but not
/// first/last/adjacent; `-` is allowed, unlike in column names).
pub fn validate_table_name(name: &str, max_name_len: usize) -> Result<()> {
    validate_name(name, TABLE_NAME_FORBIDDEN, max_name_len)
}

/// Validates a symbol/column name. Additionally forbids `-` and `.`.
pub fn validate_column_name(name: &str, max_name_len: usize) -> Result<()> {
    validate_name(name, COLUMN_NAME_FORBIDDEN, max_name_len)
}

/// Appends `s` to `out`, escaping the unquoted-context separators ` `, `,`,
/// `=`, and the line terminators `\r`/`\n`. `\\` is doubled. `"` is left
/// untouched, matching QuestDB's grammar outside of quoted string values.
pub fn escape_unquoted(out: &mut Vec<u8>, s: &str) {
    for c in s.chars() {
        match c {
            ' ' | ',' | '=' => {
                out.push(b'\\');
                push_char(out, c);
            }
            '\\' => out.extend_from_slice(b"\\\\"),
            '\r' => out.extend_from_slice(b"\\\r"),
            '\n' => out.extend_from_slice(b"\\\n"),
            _ => push_char(out, c),
        }
    }
}

/// Appends `s` to `out` inside a double-quoted string value: only `"` and
/// `\` are escaped.
pub fn escape_quoted(out: &mut Vec<u8>, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            _ => push_char(out, c),
        }
    }
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_table_name("", 127).is_err());
    }

    #[test]
    fn rejects_overlong_name() {
        let name: String = std::iter::repeat('a').take(128).collect();
        assert!(validate_table_name(&name, 127).is_err());
    }

    #[test]
    fn rejects_forbidden_chars() {
        assert!(validate_table_name("bad?name", 127).is_err());
        assert!(validate_column_name("bad-name", 127).is_err());
        assert!(validate_column_name("bad.name", 127).is_err());
    }

    #[test]
    fn rejects_leading_trailing_or_adjacent_dots() {
        assert!(validate_table_name(".leading", 127).is_err());
        assert!(validate_table_name("trailing.", 127).is_err());
        assert!(validate_table_name("a..b", 127).is_err());
        assert!(validate_table_name("a.b", 127).is_ok());
    }

    #[test]
    fn escapes_separators_outside_quotes() {
        let mut out = Vec::new();
        escape_unquoted(&mut out, "v alu, e=x");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r"v\ alu\,\ e\=x"
        );
    }

    #[test]
    fn escapes_quotes_and_backslash_inside_quotes() {
        let mut out = Vec::new();
        escape_quoted(&mut out, r#" -=""#);
        assert_eq!(String::from_utf8(out).unwrap(), r#" -=\""#);
    }
}
