//! Top-level entry points: `parse` turns template bytes into an instruction
//! list, `apply_context` patches that list with per-fragment overrides, and
//! [`crate::assembler::render`] (re-exported here as `render`) drives it to
//! an HTTP outcome. Splitting `parse`/`apply_context` out from the
//! assembler keeps the cacheable, context-free half of the pipeline (a
//! template parses the same way regardless of who's asking) separate from
//! the per-request half (§10.3/Design Notes' cache-boundary note: hosts are
//! expected to cache `ParsedTemplate` keyed on template bytes, not on the
//! rendered response).

use std::collections::BTreeMap;

use crate::instruction::{Instruction, ParsedTemplate};

pub use crate::assembler::{render, RenderConfig, RenderOutcome};

/// Parses a base template and optional child template into an instruction
/// list. Pure and context-free — safe to cache on `(base, child)` bytes.
/// `default_timeout_ms` is applied to any fragment tag that omits its own
/// `timeout` attribute.
pub fn parse(
    base: &[u8],
    child: Option<&[u8]>,
    handled_tags: &[String],
    max_asset_links: usize,
    default_timeout_ms: u64,
) -> ParsedTemplate {
    crate::parser::parse(base, child, handled_tags, max_asset_links, default_timeout_ms)
}

/// Applies `contextOverrides` (keyed by fragment `id`) to a parsed
/// template, without mutating the cached original. Fragments whose `id`
/// has no entry in `overrides` are left untouched.
pub fn apply_context(
    template: &ParsedTemplate,
    overrides: &BTreeMap<String, BTreeMap<String, String>>,
) -> ParsedTemplate {
    ParsedTemplate {
        head: apply_to_list(&template.head, overrides),
        body: apply_to_list(&template.body, overrides),
        shell: template.shell,
        warnings: template.warnings.clone(),
    }
}

fn apply_to_list(instrs: &[Instruction], overrides: &BTreeMap<String, BTreeMap<String, String>>) -> Vec<Instruction> {
    instrs
        .iter()
        .map(|instr| match instr {
            Instruction::Fragment(d) => Instruction::Fragment(patched(d, overrides)),
            Instruction::AsyncPlaceholder(d) => Instruction::AsyncPlaceholder(patched(d, overrides)),
            other => other.clone(),
        })
        .collect()
}

fn patched(
    descriptor: &crate::descriptor::FragmentDescriptor,
    overrides: &BTreeMap<String, BTreeMap<String, String>>,
) -> crate::descriptor::FragmentDescriptor {
    match overrides.get(&descriptor.id) {
        Some(patch) => descriptor.with_overrides(patch),
        None => descriptor.clone(),
    }
}
