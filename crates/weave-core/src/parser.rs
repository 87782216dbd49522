//! Template parser and slot resolver.
//!
//! Turns base (and optional child) template bytes into an ordered
//! [`Instruction`] list plus the shell elements that were present in the
//! source. Everything that isn't one of a handful of structural tags
//! (`html`, `head`, `body`, `fragment`, `slot`, fragment/slot `script`s, and
//! host-configured custom tags) is passed through as opaque literal bytes —
//! there is no general HTML tree builder here.

use std::collections::BTreeMap;

use crate::descriptor::FragmentDescriptor;
use crate::instruction::{Instruction, ParsedTemplate, ShellState};
use crate::pipe::PipePlanner;
use crate::tokenizer::{self, RawConstruct, Token, Tokenizer};

const DEFAULT_SLOT: &str = "default";

/// Parses `base` (and, if given, `child`) into a [`ParsedTemplate`].
///
/// `handled_tags` delegates additional tag names to `Instruction::CustomTag`.
/// `max_asset_links` feeds the pipe planner's worst-case index reservation
/// per fragment (see [`crate::pipe`]). `default_timeout_ms` is the fetch
/// timeout given to any fragment tag that omits its own `timeout` attribute.
pub fn parse(
    base: &[u8],
    child: Option<&[u8]>,
    handled_tags: &[String],
    max_asset_links: usize,
    default_timeout_ms: u64,
) -> ParsedTemplate {
    let slot_map = child.map(split_child_nodes).unwrap_or_default();
    let mut planner = PipePlanner::new(max_asset_links);
    let mut state = ParserState {
        handled_tags,
        slot_map,
        planner: &mut planner,
        shell: ShellState::default(),
        warnings: Vec::new(),
        fragment_index: 0,
        saw_default_slot: false,
        rendered_default_slot: false,
        default_timeout_ms,
        head_out: Vec::new(),
        body_out: Vec::new(),
        stack: vec![Frame::new(SinkKind::Body)],
    };
    state.run(base);
    state.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    Head,
    Body,
    SlotFallback,
    /// Inside a fragment's (or custom tag's) subtree: its own non-fragment
    /// children are dropped, but any nested `<fragment>` flattens out to the
    /// nearest non-`Discard` ancestor.
    Discard,
}

struct Frame {
    kind: SinkKind,
    slot_name: String,
    buf: Vec<Instruction>,
    literal: Vec<u8>,
}

impl Frame {
    fn new(kind: SinkKind) -> Self {
        Self { kind, slot_name: String::new(), buf: Vec::new(), literal: Vec::new() }
    }

    fn push_literal(&mut self, bytes: &[u8]) {
        self.literal.extend_from_slice(bytes);
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.buf.push(Instruction::Literal(std::mem::take(&mut self.literal)));
        }
    }

    fn push_instr(&mut self, instr: Instruction) {
        self.flush_literal();
        self.buf.push(instr);
    }

    /// Drains this frame's accumulated instructions (flushing pending
    /// literal bytes first).
    fn into_instructions(mut self) -> Vec<Instruction> {
        self.flush_literal();
        self.buf
    }
}

struct ParserState<'a> {
    handled_tags: &'a [String],
    slot_map: BTreeMap<String, Vec<u8>>,
    planner: &'a mut PipePlanner,
    shell: ShellState,
    warnings: Vec<String>,
    fragment_index: usize,
    saw_default_slot: bool,
    rendered_default_slot: bool,
    default_timeout_ms: u64,
    /// `<head>`/`<body>` content flushes here (not onto the stack's parent
    /// frame) the moment its frame closes, so head and body never get
    /// conflated regardless of where a `<head>` happened to sit in the
    /// stack when it closed.
    head_out: Vec<Instruction>,
    body_out: Vec<Instruction>,
    stack: Vec<Frame>,
}

impl<'a> ParserState<'a> {
    fn is_handled(&self, name: &str) -> bool {
        self.handled_tags.iter().any(|t| t.eq_ignore_ascii_case(name))
    }

    fn run(&mut self, base: &[u8]) {
        let handled_tags = self.handled_tags;
        let structural = |name: &str| {
            matches!(name, "html" | "head" | "body" | "fragment" | "slot")
                || handled_tags.iter().any(|t| t.eq_ignore_ascii_case(name))
        };

        for tok in Tokenizer::new(base, structural) {
            match tok {
                Token::Text(bytes) => self.top().push_literal(bytes),
                Token::Open { name, attrs, self_closing } => self.open(&name, attrs, self_closing),
                Token::Close { name } => self.close(&name),
                Token::RawElement { name, attrs, inner, raw } => self.raw_element(&name, attrs, inner, raw),
            }
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("sink stack never empties")
    }

    fn open(&mut self, name: &str, attrs: tokenizer::Attrs, self_closing: bool) {
        match name {
            "html" => self.shell.had_html = true,
            "head" => {
                self.shell.had_head = true;
                if !self_closing {
                    self.stack.push(Frame::new(SinkKind::Head));
                }
            }
            "body" => {
                self.shell.had_body = true;
                if !self_closing {
                    self.stack.push(Frame::new(SinkKind::Body));
                }
            }
            "fragment" => self.open_fragment(attrs, self_closing),
            "slot" => self.open_slot(slot_attr_name(&attrs), self_closing),
            _ if self.is_handled(name) => self.open_custom(name, attrs, self_closing),
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        match name {
            "head" => self.pop_flush_into(SinkKind::Head),
            "body" => self.pop_flush_into(SinkKind::Body),
            "fragment" => self.pop_discard(),
            "slot" => self.pop_slot(),
            _ if self.is_handled(name) => self.pop_discard(),
            _ => {}
        }
    }

    fn open_fragment(&mut self, attrs: tokenizer::Attrs, self_closing: bool) {
        let index = self.fragment_index;
        self.fragment_index += 1;
        let pipe_lo = self.planner.reserve();
        let descriptor = self.build_descriptor(index, pipe_lo, &attrs);
        let instr = if descriptor.is_async {
            Instruction::AsyncPlaceholder(descriptor)
        } else {
            Instruction::Fragment(descriptor)
        };
        self.push_fragment_instr(instr);
        if !self_closing {
            self.stack.push(Frame::new(SinkKind::Discard));
        }
    }

    /// Builds a descriptor for a freshly-seen fragment tag, falling back to
    /// the host's configured default timeout (not the hard-coded one) when
    /// the tag itself has no `timeout` attribute.
    fn build_descriptor(&self, index: usize, pipe_lo: usize, attrs: &tokenizer::Attrs) -> FragmentDescriptor {
        let mut descriptor = FragmentDescriptor::from_attrs(index, pipe_lo, attrs);
        if !descriptor.attrs.contains_key("timeout") {
            descriptor.timeout_ms = self.default_timeout_ms;
        }
        descriptor
    }

    fn open_custom(&mut self, name: &str, attrs: tokenizer::Attrs, self_closing: bool) {
        let attrs = attrs.into_iter().collect::<BTreeMap<_, _>>();
        self.push_fragment_instr(Instruction::CustomTag { name: name.to_string(), attrs });
        if !self_closing {
            self.stack.push(Frame::new(SinkKind::Discard));
        }
    }

    /// Appends `instr` to the nearest non-`Discard` ancestor, implementing
    /// nested-fragment flattening: a fragment (or custom tag) opened while
    /// inside another fragment's subtree still lands as a sibling of the
    /// outer one, not nested inside it.
    fn push_fragment_instr(&mut self, instr: Instruction) {
        let target = self
            .stack
            .iter()
            .rposition(|f| f.kind != SinkKind::Discard)
            .expect("sink stack always has a Head/Body root");
        self.stack[target].push_instr(instr);
    }

    fn pop_discard(&mut self) {
        if matches!(self.stack.last(), Some(f) if f.kind == SinkKind::Discard) {
            self.stack.pop();
        }
    }

    fn pop_flush_into(&mut self, kind: SinkKind) {
        if matches!(self.stack.last(), Some(f) if f.kind == kind) {
            let frame = self.stack.pop().unwrap();
            let instrs = frame.into_instructions();
            match kind {
                SinkKind::Head => self.head_out.extend(instrs),
                _ => self.body_out.extend(instrs),
            }
        }
    }

    fn open_slot(&mut self, raw_name: Option<String>, self_closing: bool) {
        let name = raw_name.unwrap_or_else(|| DEFAULT_SLOT.to_string());
        let name = if name.eq_ignore_ascii_case(DEFAULT_SLOT) { DEFAULT_SLOT.to_string() } else { name };

        if name == DEFAULT_SLOT {
            if self.saw_default_slot {
                self.warnings.push("duplicate default slot; only the first is rendered".to_string());
            }
            self.saw_default_slot = true;
        }

        let mut frame = Frame::new(SinkKind::SlotFallback);
        frame.slot_name = name;
        self.stack.push(frame);
        if self_closing {
            self.pop_slot();
        }
    }

    fn pop_slot(&mut self) {
        if !matches!(self.stack.last(), Some(f) if f.kind == SinkKind::SlotFallback) {
            return;
        }
        let frame = self.stack.pop().unwrap();
        let is_duplicate_default = frame.slot_name == DEFAULT_SLOT && self.default_slot_already_rendered();
        let name = frame.slot_name.clone();
        let fallback = frame.into_instructions();

        if is_duplicate_default {
            return;
        }
        if name == DEFAULT_SLOT {
            self.rendered_default_slot = true;
        }

        let resolved = match self.slot_map.get(&name) {
            Some(bytes) if !bytes.is_empty() => vec![Instruction::Literal(bytes.clone())],
            _ => fallback,
        };
        let parent = self.top();
        for instr in resolved {
            parent.push_instr(instr);
        }
    }

    /// Whether a default slot has already been flushed into its parent
    /// (tracked separately from `saw_default_slot`, which fires at open
    /// time: the first slot seen is always rendered even though by the
    /// time it's closed a later duplicate may have already been opened).
    fn default_slot_already_rendered(&self) -> bool {
        self.rendered_default_slot
    }

    fn raw_element(&mut self, name: &str, attrs: tokenizer::Attrs, inner: &[u8], raw: &[u8]) {
        if name == "script" {
            let attr_map: BTreeMap<String, String> = attrs.iter().cloned().collect();
            match attr_map.get("type").map(String::as_str) {
                Some("fragment") => {
                    let index = self.fragment_index;
                    self.fragment_index += 1;
                    let pipe_lo = self.planner.reserve();
                    let descriptor = self.build_descriptor(index, pipe_lo, &attrs);
                    let instr = if descriptor.is_async {
                        Instruction::AsyncPlaceholder(descriptor)
                    } else {
                        Instruction::Fragment(descriptor)
                    };
                    // `<script type="fragment">` always routes to <head>,
                    // regardless of where it appeared in source order.
                    self.head_out.push(instr);
                    return;
                }
                Some("slot") => {
                    let slot_name = slot_attr_name(&attrs).unwrap_or_else(|| DEFAULT_SLOT.to_string());
                    let slot_name = if slot_name.eq_ignore_ascii_case(DEFAULT_SLOT) {
                        DEFAULT_SLOT.to_string()
                    } else {
                        slot_name
                    };
                    if slot_name == DEFAULT_SLOT {
                        if self.saw_default_slot {
                            self.warnings.push("duplicate default slot; only the first is rendered".to_string());
                            self.saw_default_slot = true;
                            return;
                        }
                        self.saw_default_slot = true;
                        self.rendered_default_slot = true;
                    }
                    let resolved = match self.slot_map.get(&slot_name) {
                        Some(bytes) if !bytes.is_empty() => bytes.clone(),
                        _ => inner.to_vec(),
                    };
                    if !resolved.is_empty() {
                        self.top().push_instr(Instruction::Literal(resolved));
                    }
                    return;
                }
                _ => {}
            }
        }
        self.top().push_literal(raw);
    }

    fn finish(mut self) -> ParsedTemplate {
        // Flush any still-open frames, routing each straight to head/body
        // output by its own kind (unmatched <head>/<body> opens, or a
        // truncated fragment/slot/custom-tag at end of input).
        while let Some(frame) = self.stack.pop() {
            let instrs = frame.into_instructions();
            match frame.kind {
                SinkKind::Head => self.head_out.extend(instrs),
                _ => self.body_out.extend(instrs),
            }
        }

        ParsedTemplate { head: self.head_out, body: self.body_out, shell: self.shell, warnings: self.warnings }
    }
}

fn slot_attr_name(attrs: &tokenizer::Attrs) -> Option<String> {
    attrs.iter().find(|(k, _)| k == "name").map(|(_, v)| v.clone())
}

/// Splits a child template into its top-level nodes, grouped by the
/// `slot="name"` attribute on each node's own tag (or `default` if absent).
/// Nodes are not recursively parsed for nested fragments: a matched slot's
/// content is copied through byte-for-byte.
fn split_child_nodes(input: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut slots: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut pos = 0usize;

    while pos < input.len() {
        if input[pos] == b'<' {
            match tokenizer::read_raw_construct(input, pos) {
                Some(RawConstruct::Comment(end)) | Some(RawConstruct::Doctype(end)) => {
                    append_to_slot(&mut slots, DEFAULT_SLOT, &input[pos..end]);
                    pos = end;
                }
                Some(RawConstruct::Close { end, .. }) => {
                    // Stray close tag with no matching open at this level.
                    append_to_slot(&mut slots, DEFAULT_SLOT, &input[pos..end]);
                    pos = end;
                }
                Some(RawConstruct::Open { name, attrs, self_closing, end }) => {
                    let lower = name.to_ascii_lowercase();
                    let slot_name = slot_attr_name(&attrs).unwrap_or_else(|| DEFAULT_SLOT.to_string());
                    let node_end = if self_closing || tokenizer::is_void_element(&lower) {
                        end
                    } else if lower == "script" || lower == "style" {
                        tokenizer::raw_text_span(input, &lower, end).1
                    } else {
                        find_matching_close(input, &lower, end)
                    };
                    append_to_slot(&mut slots, &slot_name, &input[pos..node_end]);
                    pos = node_end;
                }
                None => pos += 1,
            }
        } else {
            let next_lt = tokenizer::find_byte(input, pos, b'<').unwrap_or(input.len());
            append_to_slot(&mut slots, DEFAULT_SLOT, &input[pos..next_lt]);
            pos = next_lt;
        }
    }

    slots
}

fn append_to_slot(slots: &mut BTreeMap<String, Vec<u8>>, name: &str, bytes: &[u8]) {
    slots.entry(name.to_string()).or_default().extend_from_slice(bytes);
}

/// Scans forward from just after `<tag ...>`'s closing `>` for the matching
/// `</tag>`, tracking nesting depth so a node like `<div><div/></div>`
/// closes at the outer `</div>`. Void elements and self-closing reopenings
/// of `tag` don't increase depth.
fn find_matching_close(input: &[u8], lower_name: &str, mut pos: usize) -> usize {
    let mut depth = 1usize;
    while pos < input.len() {
        let next_lt = match tokenizer::find_byte(input, pos, b'<') {
            Some(p) => p,
            None => return input.len(),
        };
        match tokenizer::read_raw_construct(input, next_lt) {
            Some(RawConstruct::Open { name, self_closing, end, .. }) => {
                if name.eq_ignore_ascii_case(lower_name) && !self_closing && !tokenizer::is_void_element(lower_name) {
                    depth += 1;
                }
                pos = end;
            }
            Some(RawConstruct::Close { name, end }) => {
                if name.eq_ignore_ascii_case(lower_name) {
                    depth -= 1;
                    if depth == 0 {
                        return end;
                    }
                }
                pos = end;
            }
            Some(RawConstruct::Comment(end)) | Some(RawConstruct::Doctype(end)) => pos = end,
            None => pos = next_lt + 1,
        }
    }
    input.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_literal(i: &Instruction) -> &[u8] {
        match i {
            Instruction::Literal(b) => b,
            other => panic!("expected Literal, got {other:?}"),
        }
    }

    #[test]
    fn two_sync_fragments_in_order() {
        let tpl = br#"<fragment src="https://a/1"/><fragment src="http://b:9000/2"/>"#;
        let out = parse(tpl, None, &[], 1, 3000);
        assert_eq!(out.body.len(), 2);
        match &out.body[0] {
            Instruction::Fragment(d) => assert_eq!(d.src.as_deref(), Some("https://a/1")),
            other => panic!("{other:?}"),
        }
        match &out.body[1] {
            Instruction::Fragment(d) => assert_eq!(d.index, 1),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn async_fragment_becomes_placeholder() {
        let tpl = br#"<fragment async src="https://a/1"/>"#;
        let out = parse(tpl, None, &[], 1, 3000);
        assert!(matches!(out.body[0], Instruction::AsyncPlaceholder(_)));
    }

    #[test]
    fn script_fragment_routes_to_head_from_body() {
        let tpl = br#"<body><script type="fragment" src="https://a/1"></script></body>"#;
        let out = parse(tpl, None, &[], 1, 3000);
        assert!(out.body.is_empty());
        assert_eq!(out.head.len(), 1);
        assert!(matches!(&out.head[0], Instruction::Fragment(d) if d.src.as_deref() == Some("https://a/1")));
    }

    #[test]
    fn nested_fragment_flattens_to_sibling() {
        let tpl = br#"<fragment src="https://a/outer">literal-dropped<fragment src="https://a/inner"/></fragment>"#;
        let out = parse(tpl, None, &[], 1, 3000);
        assert_eq!(out.body.len(), 2);
        assert!(matches!(&out.body[0], Instruction::Fragment(d) if d.src.as_deref() == Some("https://a/outer")));
        assert!(matches!(&out.body[1], Instruction::Fragment(d) if d.src.as_deref() == Some("https://a/inner")));
    }

    #[test]
    fn slot_substitution_from_child() {
        let base = br#"<head><script type="slot" name="head"></script></head><body></body>"#;
        let child = br#"<meta slot="head" charset="utf-8">"#;
        let out = parse(base, Some(child), &[], 1, 3000);
        assert_eq!(out.head.len(), 1);
        assert_eq!(body_literal(&out.head[0]), child.as_slice());
        assert!(out.body.is_empty());
    }

    #[test]
    fn slot_fallback_used_when_no_match() {
        let base = br#"<slot name="x">fallback</slot>"#;
        let out = parse(base, None, &[], 1, 3000);
        assert_eq!(body_literal(&out.body[0]), b"fallback");
    }

    #[test]
    fn duplicate_default_slot_warns_and_keeps_first() {
        let base = br#"<slot>first</slot><slot>second</slot>"#;
        let out = parse(base, None, &[], 1, 3000);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(body_literal(&out.body[0]), b"first");
    }

    #[test]
    fn custom_tag_delegates_and_discards_children() {
        let base = br#"<widget foo="bar">ignored</widget>"#;
        let out = parse(base, None, &["widget".to_string()], 1, 3000);
        assert_eq!(out.body.len(), 1);
        match &out.body[0] {
            Instruction::CustomTag { name, attrs } => {
                assert_eq!(name, "widget");
                assert_eq!(attrs.get("foo").map(String::as_str), Some("bar"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn literal_html_passes_through_untouched() {
        let base = br#"<div class="x">hi <b>there</b></div>"#;
        let out = parse(base, None, &[], 1, 3000);
        assert_eq!(body_literal(&out.body[0]), base.as_slice());
    }

    #[test]
    fn pipe_indices_advance_by_max_asset_links() {
        let tpl = br#"<fragment src="https://a/1"/><fragment src="https://a/2"/>"#;
        let out = parse(tpl, None, &[], 3, 3000);
        match (&out.body[0], &out.body[1]) {
            (Instruction::Fragment(a), Instruction::Fragment(b)) => {
                assert_eq!(a.pipe_lo, 0);
                assert_eq!(b.pipe_lo, 3);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn fragment_without_timeout_attr_uses_configured_default() {
        let tpl = br#"<fragment src="https://a/1"/><fragment src="https://a/2" timeout="99"/>"#;
        let out = parse(tpl, None, &[], 1, 7000);
        match (&out.body[0], &out.body[1]) {
            (Instruction::Fragment(a), Instruction::Fragment(b)) => {
                assert_eq!(a.timeout_ms, 7000, "omitted timeout falls back to the host's configured default");
                assert_eq!(b.timeout_ms, 99, "explicit timeout attribute always wins");
            }
            other => panic!("{other:?}"),
        }
    }
}
