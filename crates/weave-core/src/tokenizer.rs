//! Byte-stream tag/text tokenizer tuned for fragment-aware rewriting.
//!
//! This is deliberately not a conforming WHATWG tokenizer: it only needs to
//! recognize a handful of structural tags (`html`, `head`, `body`,
//! `fragment`, `slot`, `script`, plus host-configured custom tags) and pass
//! everything else through as opaque bytes. Malformed markup never produces
//! an error — worst case, more bytes end up classified as `Text` than a
//! strict parser would allow.

/// An HTML attribute as `(name, value)`. Value is empty for bare attributes
/// (e.g. `<fragment async>`).
pub type Attrs = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Opaque bytes: text runs, comments, doctypes, and any tag we don't
    /// treat structurally (re-emitted verbatim, tag markup included).
    Text(&'a [u8]),
    /// A recognized opening tag.
    Open {
        name: String,
        attrs: Attrs,
        self_closing: bool,
    },
    /// A recognized closing tag.
    Close { name: String },
    /// A `<script>` or `<style>` element captured whole: its raw-text
    /// content is never re-tokenized (it may contain `<` that isn't markup).
    /// `name` is lowercased; callers decide whether this was structural
    /// (`script[type=fragment]`, `script[type=slot]`) or plain passthrough.
    RawElement {
        name: String,
        attrs: Attrs,
        inner: &'a [u8],
        /// The full `<script ...>...</script>` span, byte-for-byte, for
        /// callers that just need verbatim passthrough.
        raw: &'a [u8],
    },
}

/// Void elements never require a matching close tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str())
}

/// Tokenizes `input`, calling `structural` to decide whether a given tag
/// name is one the caller wants as `Open`/`Close`/`RawElement` (true) or as
/// opaque `Text` (false). `script` and `style` are always captured via
/// `RawElement` regardless of `structural`, since their content must never
/// be re-scanned for tags.
pub struct Tokenizer<'a, F> {
    input: &'a [u8],
    pos: usize,
    structural: F,
}

impl<'a, F> Tokenizer<'a, F>
where
    F: Fn(&str) -> bool,
{
    pub fn new(input: &'a [u8], structural: F) -> Self {
        Self {
            input,
            pos: 0,
            structural,
        }
    }
}

impl<'a, F> Iterator for Tokenizer<'a, F>
where
    F: Fn(&str) -> bool,
{
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.pos >= self.input.len() {
            return None;
        }

        let start = self.pos;
        if self.input[self.pos] == b'<' {
            if let Some(raw) = read_raw_construct(self.input, self.pos) {
                match raw {
                    RawConstruct::Comment(end) | RawConstruct::Doctype(end) => {
                        self.pos = end;
                        return Some(Token::Text(&self.input[start..end]));
                    }
                    RawConstruct::Close { name, end } => {
                        self.pos = end;
                        if (self.structural)(&name) {
                            return Some(Token::Close { name });
                        }
                        return Some(Token::Text(&self.input[start..end]));
                    }
                    RawConstruct::Open {
                        name,
                        attrs,
                        self_closing,
                        end,
                    } => {
                        let lower = name.to_ascii_lowercase();
                        if !self_closing && (lower == "script" || lower == "style") {
                            let (inner_end, full_end) = raw_text_span(self.input, &lower, end);
                            self.pos = full_end;
                            return Some(Token::RawElement {
                                name: lower,
                                attrs,
                                inner: &self.input[end..inner_end],
                                raw: &self.input[start..full_end],
                            });
                        }

                        self.pos = end;
                        if (self.structural)(&lower) {
                            return Some(Token::Open {
                                name: lower,
                                attrs,
                                self_closing,
                            });
                        }
                        Some(Token::Text(&self.input[start..end]))
                    }
                }
            } else {
                // Lone '<' that isn't a recognizable construct: one literal byte.
                self.pos += 1;
                Some(Token::Text(&self.input[start..self.pos]))
            }
        } else {
            let next_lt = find_byte(self.input, self.pos, b'<').unwrap_or(self.input.len());
            self.pos = next_lt;
            Some(Token::Text(&self.input[start..next_lt]))
        }
    }
}

pub(crate) enum RawConstruct {
    Comment(usize),
    Doctype(usize),
    Open {
        name: String,
        attrs: Attrs,
        self_closing: bool,
        end: usize,
    },
    Close {
        name: String,
        end: usize,
    },
}

/// Parses the `<...>` construct starting at `pos` (which must point at `<`).
/// Returns `None` if this isn't a tag-like construct at all. Exposed at
/// crate visibility so other modules (e.g. the child-template slot
/// splitter) can drive their own generic, name-agnostic scan over the same
/// low-level grammar without duplicating it.
pub(crate) fn read_raw_construct(input: &[u8], pos: usize) -> Option<RawConstruct> {
    debug_assert_eq!(input.get(pos), Some(&b'<'));

    if input[pos..].starts_with(b"<!--") {
        let end = find_subslice(input, pos + 4, b"-->")
            .map(|p| p + 3)
            .unwrap_or(input.len());
        return Some(RawConstruct::Comment(end));
    }
    if input[pos..].starts_with(b"<!") {
        let end = find_byte(input, pos, b'>').map(|p| p + 1).unwrap_or(input.len());
        return Some(RawConstruct::Doctype(end));
    }
    if input.get(pos + 1) == Some(&b'/') {
        let name_start = pos + 2;
        let mut i = name_start;
        while i < input.len() && is_name_byte(input[i]) {
            i += 1;
        }
        if i == name_start {
            return None;
        }
        let name = String::from_utf8_lossy(&input[name_start..i]).to_string();
        let end = find_byte(input, i, b'>').map(|p| p + 1).unwrap_or(input.len());
        return Some(RawConstruct::Close { name, end });
    }

    let name_start = pos + 1;
    if name_start >= input.len() || !input[name_start].is_ascii_alphabetic() {
        return None;
    }
    let mut i = name_start;
    while i < input.len() && is_name_byte(input[i]) {
        i += 1;
    }
    let name = String::from_utf8_lossy(&input[name_start..i]).to_string();

    let (attrs, self_closing, tag_end) = parse_attrs(input, i);
    Some(RawConstruct::Open {
        name,
        attrs,
        self_closing,
        end: tag_end,
    })
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b':'
}

/// Parses attributes starting right after the tag name, returning
/// `(attrs, self_closing, position_after_closing_'>')`.
fn parse_attrs(input: &[u8], mut i: usize) -> (Attrs, bool, usize) {
    let mut attrs = Attrs::new();
    let mut self_closing = false;

    loop {
        while i < input.len() && input[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= input.len() {
            return (attrs, self_closing, i);
        }
        if input[i] == b'>' {
            return (attrs, self_closing, i + 1);
        }
        if input[i] == b'/' && input.get(i + 1) == Some(&b'>') {
            self_closing = true;
            return (attrs, self_closing, i + 2);
        }
        if input[i] == b'/' {
            i += 1;
            continue;
        }

        let name_start = i;
        while i < input.len() && !input[i].is_ascii_whitespace() && input[i] != b'=' && input[i] != b'>' && input[i] != b'/' {
            i += 1;
        }
        if i == name_start {
            i += 1;
            continue;
        }
        let name = String::from_utf8_lossy(&input[name_start..i]).to_ascii_lowercase();

        while i < input.len() && input[i].is_ascii_whitespace() {
            i += 1;
        }

        let mut value = String::new();
        if i < input.len() && input[i] == b'=' {
            i += 1;
            while i < input.len() && input[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < input.len() && (input[i] == b'"' || input[i] == b'\'') {
                let quote = input[i];
                i += 1;
                let value_start = i;
                while i < input.len() && input[i] != quote {
                    i += 1;
                }
                value = String::from_utf8_lossy(&input[value_start..i]).to_string();
                if i < input.len() {
                    i += 1;
                }
            } else {
                let value_start = i;
                while i < input.len() && !input[i].is_ascii_whitespace() && input[i] != b'>' {
                    i += 1;
                }
                value = String::from_utf8_lossy(&input[value_start..i]).to_string();
            }
        }

        attrs.push((name, value));
    }
}

/// Given the position right after a `<script`/`<style` open tag's closing
/// `>`, returns `(inner_end, full_end)`: where the raw-text content ends
/// and where the matching close tag's `>` ends. Shared by the main
/// tokenizer and the child-template node splitter so neither re-scans
/// raw-text content for nested tags.
pub(crate) fn raw_text_span(input: &[u8], lower_name: &str, inner_start: usize) -> (usize, usize) {
    let close_tag = format!("</{lower_name}");
    let inner_end = find_case_insensitive(input, inner_start, &close_tag).unwrap_or(input.len());
    let full_end = if inner_end < input.len() {
        find_byte(input, inner_end, b'>').map(|p| p + 1).unwrap_or(input.len())
    } else {
        inner_end
    };
    (inner_end, full_end)
}

pub(crate) fn find_byte(input: &[u8], from: usize, needle: u8) -> Option<usize> {
    input[from..].iter().position(|&b| b == needle).map(|p| from + p)
}

fn find_subslice(input: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > input.len() {
        return None;
    }
    input[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

fn find_case_insensitive(input: &[u8], from: usize, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if from > input.len() || needle.is_empty() {
        return None;
    }
    input[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|p| from + p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> Vec<Token<'_>> {
        Tokenizer::new(input.as_bytes(), |name| {
            matches!(name, "html" | "head" | "body" | "fragment" | "slot" | "script")
        })
        .collect()
    }

    #[test]
    fn self_closing_fragment() {
        let toks = collect(r#"<fragment src="https://a/1"/>"#);
        assert_eq!(toks.len(), 1);
        match &toks[0] {
            Token::Open { name, attrs, self_closing } => {
                assert_eq!(name, "fragment");
                assert!(self_closing);
                assert_eq!(attrs[0], ("src".into(), "https://a/1".into()));
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn literal_div_is_text() {
        let toks = collect("<div class=\"x\">hi</div>");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0], Token::Text(b"<div class=\"x\">hi</div>"));
    }

    #[test]
    fn script_content_not_rescanned() {
        let toks = collect("<script>if (1 < 2) {}</script>tail");
        assert!(matches!(&toks[0], Token::RawElement { name, inner, raw, .. }
            if name == "script" && *inner == b"if (1 < 2) {}" && *raw == b"<script>if (1 < 2) {}</script>"));
        assert_eq!(toks[1], Token::Text(b"tail"));
    }

    #[test]
    fn bare_boolean_attr() {
        let toks = collect(r#"<fragment async src="https://a/1"/>"#);
        match &toks[0] {
            Token::Open { attrs, .. } => {
                assert_eq!(attrs[0], ("async".into(), String::new()));
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn comment_passthrough() {
        let toks = collect("<!-- hello <fragment/> --><body></body>");
        assert_eq!(toks[0], Token::Text(b"<!-- hello <fragment/> -->"));
        assert!(matches!(&toks[1], Token::Open { name, .. } if name == "body"));
    }
}
