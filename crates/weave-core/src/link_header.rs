//! Parses RFC 5988 `Link` headers (or the `X-AMZ-Meta-Link` fallback) into
//! typed [`AssetEntry`] values.

use crate::descriptor::{AssetEntry, AssetRel};

/// Picks whichever of `Link` / `X-AMZ-Meta-Link` is present first
/// (case-insensitive header name match, `Link` checked first).
pub fn pick_link_header<'a, I, K, V>(headers: I) -> Option<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut link = None;
    let mut amz = None;
    for (k, v) in headers {
        let k = k.as_ref();
        if link.is_none() && k.eq_ignore_ascii_case("link") {
            link = Some(v.as_ref().to_string());
        } else if amz.is_none() && k.eq_ignore_ascii_case("x-amz-meta-link") {
            amz = Some(v.as_ref().to_string());
        }
    }
    link.or(amz)
}

/// Parses a `Link` header value into asset entries, applying `max_per_rel`
/// as a cap on both `stylesheet` and `fragment-script` entries (excess
/// entries of a rel are dropped, first-seen wins).
pub fn parse(value: &str, request_host: &str, max_per_rel: usize) -> Vec<AssetEntry> {
    let mut stylesheets = 0usize;
    let mut scripts = 0usize;
    let mut out = Vec::new();

    for entry in split_entries(value) {
        let Some((href, params)) = parse_entry(entry) else {
            continue;
        };
        let rel = params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("rel"))
            .map(|(_, v)| v.as_str());

        let rel = match rel {
            Some("stylesheet") => AssetRel::Stylesheet,
            Some("fragment-script") => AssetRel::FragmentScript,
            _ => continue,
        };

        match rel {
            AssetRel::Stylesheet if stylesheets >= max_per_rel => continue,
            AssetRel::FragmentScript if scripts >= max_per_rel => continue,
            _ => {}
        }

        let crossorigin = !is_same_origin(&href, request_host);

        match rel {
            AssetRel::Stylesheet => stylesheets += 1,
            AssetRel::FragmentScript => scripts += 1,
        }

        out.push(AssetEntry { href, rel, crossorigin });
    }

    out
}

fn is_same_origin(href: &str, request_host: &str) -> bool {
    match url::Url::parse(href) {
        Ok(url) => match url.host_str() {
            Some(h) => {
                let href_authority = match url.port() {
                    Some(p) => format!("{h}:{p}"),
                    None => h.to_string(),
                };
                href_authority.eq_ignore_ascii_case(request_host) || h.eq_ignore_ascii_case(request_host)
            }
            None => false,
        },
        Err(_) => true, // relative URLs are always same-origin
    }
}

/// Splits on top-level commas, i.e. commas that aren't inside a quoted
/// string (a `rel` value can't contain a comma in practice, but hrefs or
/// other params shouldn't be split on).
fn split_entries(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = value[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Parses one `<href>; rel="x"; other="y"` entry.
fn parse_entry(entry: &str) -> Option<(String, Vec<(String, String)>)> {
    let mut parts = entry.split(';');
    let href_part = parts.next()?.trim();
    let href = href_part
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(href_part)
        .to_string();

    let params = parts
        .filter_map(|p| {
            let p = p.trim();
            let (k, v) = p.split_once('=')?;
            let v = v.trim().trim_matches('"');
            Some((k.trim().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    Some((href, params))
}
