//! Read-only views of the markdown source: front matter, body, lines.

use serde_json::Value;

/// Split YAML front matter from the document body.
///
/// Front matter must open on the first line with `---` (an optional BOM is
/// allowed) and close with a line that is exactly `---`, ignoring trailing
/// whitespace. The returned front matter keeps both delimiter lines; the
/// body starts after the closing line's newline.
pub fn split_front_matter(src: &str) -> (Option<&str>, &str) {
    let content = src.strip_prefix('\u{feff}').unwrap_or(src);
    let offset = src.len() - content.len();

    let Some(first_line_end) = content.find('\n') else {
        return (None, src);
    };
    if content[..first_line_end].trim_end() != "---" {
        return (None, src);
    }

    let mut pos = first_line_end + 1;
    while pos <= content.len() {
        let line_end = content[pos..].find('\n').map_or(content.len(), |i| pos + i);
        let line = &content[pos..line_end];
        if line.trim_end() == "---" {
            let fm_end = offset + line_end;
            let body_start = (fm_end + 1).min(src.len());
            return (Some(&src[..fm_end]), &src[body_start..]);
        }
        if line_end == content.len() {
            break;
        }
        pos = line_end + 1;
    }
    (None, src)
}

pub fn front_matter_raw(src: &str) -> Option<&str> {
    split_front_matter(src).0
}

pub fn doc_body(src: &str) -> &str {
    split_front_matter(src).1
}

/// Parse front matter as YAML. `None` when absent, unparseable or not a
/// mapping.
pub fn doc_meta(src: &str) -> Option<Value> {
    let raw = front_matter_raw(src)?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let inner = raw
        .split_once('\n')
        .map_or("", |(_, rest)| rest)
        .trim_end();
    let inner = inner
        .strip_suffix("---")
        .unwrap_or(inner)
        .trim_end_matches(['\r', '\n']);

    match serde_yaml::from_str::<Value>(inner) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Front matter is not valid YAML");
            None
        }
    }
}

/// Text of a 1-based line without its line ending; empty when out of range.
pub fn line_text(src: &str, line_number: usize) -> String {
    if line_number == 0 {
        return String::new();
    }
    src.split('\n')
        .nth(line_number - 1)
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = "---\ntitle: Hello\ntags: [a, b]\n---\n# Body\ntext\n";

    #[test]
    fn test_split_front_matter() {
        let (fm, body) = split_front_matter(DOC);
        assert_eq!(fm, Some("---\ntitle: Hello\ntags: [a, b]\n---"));
        assert_eq!(body, "# Body\ntext\n");
    }

    #[test]
    fn test_no_front_matter() {
        assert_eq!(split_front_matter("# Title\n---\n"), (None, "# Title\n---\n"));
        assert_eq!(split_front_matter("---\nunterminated"), (None, "---\nunterminated"));
        assert_eq!(doc_body(""), "");
    }

    #[test]
    fn test_bom_and_crlf() {
        let src = "\u{feff}---\r\na: 1\r\n---\r\nbody";
        assert_eq!(doc_body(src), "body");
        assert_eq!(doc_meta(src), Some(json!({"a": 1})));
    }

    #[test]
    fn test_doc_meta() {
        assert_eq!(
            doc_meta(DOC),
            Some(json!({"title": "Hello", "tags": ["a", "b"]}))
        );
        assert_eq!(doc_meta("---\n- just\n- a list\n---\n"), None);
        assert_eq!(doc_meta("---\ntitle: [unclosed\n---\n"), None);
        assert_eq!(doc_meta("no front matter"), None);
    }

    #[test]
    fn test_line_text() {
        let src = "one\r\ntwo\nthree";
        assert_eq!(line_text(src, 1), "one");
        assert_eq!(line_text(src, 3), "three");
        assert_eq!(line_text(src, 0), "");
        assert_eq!(line_text(src, 9), "");
    }
}
