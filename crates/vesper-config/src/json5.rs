//! Minimal JSON5-to-JSON conversion: strips `//` and `/* */` comments and
//! quotes bare (unquoted) object keys. Scoped narrowly to what
//! [`crate::ConfigStore::load_from_dir`] needs for `.json5`/`.vconf5` files —
//! this is not a general JSON5 parser.

use crate::error::ConfigError;

/// Strips single- and multi-line comments from `json5`, leaving string
/// contents untouched.
pub fn remove_comments(json5: &str) -> Result<String, ConfigError> {
    if json5.is_empty() {
        return Ok(String::new());
    }

    let bytes = json5.as_bytes();
    let mut result = String::with_capacity(json5.len());
    let mut in_single_line_comment = false;
    let mut in_multi_line_comment = false;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if !in_single_line_comment && !in_multi_line_comment && c == '"' {
            in_string = !in_string;
            result.push(c);
            i += 1;
            continue;
        }

        if in_string {
            result.push(c);
            i += 1;
            continue;
        }

        if !in_multi_line_comment && !in_single_line_comment && i + 1 < bytes.len() {
            let next = bytes[i + 1] as char;
            if c == '/' && next == '/' {
                in_single_line_comment = true;
                i += 2;
                continue;
            }
            if c == '/' && next == '*' {
                in_multi_line_comment = true;
                i += 2;
                continue;
            }
        }

        if in_single_line_comment {
            if c == '\n' {
                in_single_line_comment = false;
                result.push('\n');
            }
            i += 1;
            continue;
        }

        if in_multi_line_comment {
            if i + 1 < bytes.len() && c == '*' && bytes[i + 1] as char == '/' {
                in_multi_line_comment = false;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        result.push(c);
        i += 1;
    }

    if in_string {
        return Err(ConfigError::Json5("unterminated string".into()));
    }
    if in_multi_line_comment {
        return Err(ConfigError::Json5("unterminated multi-line comment".into()));
    }

    Ok(result)
}

/// Quotes bare identifiers (anything starting with an ASCII letter or `_`,
/// continuing with alphanumerics/`_`/`-`) that appear outside a string.
///
/// This is a direct, deliberately literal port of the comment-stripped
/// source's identifier scan: it quotes object keys but, just like that
/// source, it will also quote a bare `true`/`false`/`null` literal value if
/// one appears unquoted — the scan has no notion of "this identifier is a
/// key" versus "this identifier is a value". Config authors who rely on
/// JSON5 booleans/null should write valid JSON (`true`, not `True`, in a
/// position the scanner would otherwise touch) or quote the value
/// themselves; see the testable properties around this in the test module.
pub fn quote_bare_identifiers(json: &str) -> Result<String, ConfigError> {
    if json.is_empty() {
        return Ok(String::new());
    }

    let chars: Vec<char> = json.chars().collect();
    let mut result = String::with_capacity(json.len() + json.len() / 5);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            in_string = !in_string;
            result.push(c);
            i += 1;
            continue;
        }

        if in_string {
            result.push(c);
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                i += 1;
            }
            result.push('"');
            result.extend(&chars[start..i]);
            result.push('"');
            continue;
        }

        result.push(c);
        i += 1;
    }

    if in_string {
        return Err(ConfigError::Json5("unterminated string in JSON5".into()));
    }

    Ok(result)
}

/// Converts a JSON5 document to plain JSON by comment-stripping followed by
/// bare-key quoting.
pub fn convert_json5_to_json(json5: &str) -> Result<String, ConfigError> {
    let stripped = remove_comments(json5)?;
    if stripped.is_empty() {
        return Ok(stripped);
    }
    quote_bare_identifiers(&stripped)
}
