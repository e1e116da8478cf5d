//! UriSet normalization.
//!
//! Converts a user-supplied, heterogeneously-shaped destination description
//! into a canonical list-of-lists: the outer list is serial order, each
//! inner list is one parallel group. Normalization never fails -- degenerate
//! input always yields `[[]]`, which the caller (`router::route`) treats as
//! "no destinations".

use std::str::FromStr;
use rvoip_sip_core::prelude::*;

/// One atomic destination before parsing: either an already-typed `Uri` or
/// a raw string a caller passed in (e.g. straight off a header value).
#[derive(Debug, Clone)]
pub enum UriSetAtom {
    Uri(Uri),
    Str(String),
}

impl From<Uri> for UriSetAtom {
    fn from(u: Uri) -> Self {
        UriSetAtom::Uri(u)
    }
}

impl From<&str> for UriSetAtom {
    fn from(s: &str) -> Self {
        UriSetAtom::Str(s.to_string())
    }
}

/// One entry in a top-level list: either a scalar destination or a nested
/// parallel group.
#[derive(Debug, Clone)]
pub enum UriSetItem {
    Atom(UriSetAtom),
    Group(Vec<UriSetAtom>),
}

/// The shapes a caller may hand the normalizer.
#[derive(Debug, Clone)]
pub enum UriSetInput {
    /// A single bare destination.
    Single(Uri),
    /// A comma-separated string of destinations.
    Csv(String),
    /// A flat list with no nested groups.
    Flat(Vec<UriSetAtom>),
    /// A list where at least one entry is itself a list (a parallel group).
    Nested(Vec<UriSetItem>),
}

fn resolve(atom: &UriSetAtom) -> Option<Uri> {
    match atom {
        UriSetAtom::Uri(u) => Some(strip_transport_params(u.clone())),
        UriSetAtom::Str(s) => Uri::from_str(s.trim()).ok().map(strip_transport_params),
    }
}

/// Strip URI parameters that RFC 3261 §19.1.1 forbids (or that are
/// meaningless) in a Request-URI: `transport`, `maddr`, `ttl`, `method`,
/// `lr`. These are Via/Route-only concerns; carrying them forward into a
/// forked request-URI would misdirect the downstream transport layer.
pub fn strip_transport_params(uri: Uri) -> Uri {
    const OPAQUE: &[&str] = &["transport", "maddr", "ttl", "method", "lr"];
    let rendered = uri.to_string();
    let Some((head, rest)) = rendered.split_once(';') else {
        return uri;
    };
    let kept: Vec<&str> = rest
        .split(';')
        .filter(|param| {
            let key = param.split('=').next().unwrap_or(param).to_ascii_lowercase();
            !OPAQUE.contains(&key.as_str())
        })
        .collect();
    let rebuilt = if kept.is_empty() {
        head.to_string()
    } else {
        format!("{};{}", head, kept.join(";"))
    };
    Uri::from_str(&rebuilt).unwrap_or(uri)
}

fn csv_to_groups(s: &str) -> Vec<Uri> {
    s.split(',')
        .filter_map(|part| Uri::from_str(part.trim()).ok())
        .map(strip_transport_params)
        .collect()
}

/// Normalize any of the supported input shapes into the canonical
/// serial-of-parallel form. Idempotent: feeding the output of this function
/// back in as `UriSetInput::Nested` of single-atom groups reproduces it.
pub fn normalize(input: UriSetInput) -> Vec<Vec<Uri>> {
    let groups = match input {
        UriSetInput::Single(uri) => vec![vec![strip_transport_params(uri)]],
        UriSetInput::Csv(s) => {
            let uris = csv_to_groups(&s);
            if uris.is_empty() { vec![] } else { vec![uris] }
        }
        UriSetInput::Flat(atoms) => {
            let uris: Vec<Uri> = atoms.iter().filter_map(resolve).collect();
            if uris.is_empty() { vec![] } else { vec![uris] }
        }
        UriSetInput::Nested(items) => normalize_nested(items),
    };

    if groups.is_empty() {
        vec![vec![]]
    } else {
        groups
    }
}

fn normalize_nested(items: Vec<UriSetItem>) -> Vec<Vec<Uri>> {
    let has_group = items.iter().any(|i| matches!(i, UriSetItem::Group(_)));

    if !has_group {
        let uris: Vec<Uri> = items
            .iter()
            .filter_map(|i| match i {
                UriSetItem::Atom(a) => resolve(a),
                UriSetItem::Group(_) => None,
            })
            .collect();
        return if uris.is_empty() { vec![] } else { vec![uris] };
    }

    let mut groups: Vec<Vec<Uri>> = Vec::new();
    let mut run: Vec<Uri> = Vec::new();

    for item in items {
        match item {
            UriSetItem::Atom(a) => {
                if let Some(u) = resolve(&a) {
                    run.push(u);
                }
            }
            UriSetItem::Group(atoms) => {
                if !run.is_empty() {
                    groups.push(std::mem::take(&mut run));
                }
                let resolved: Vec<Uri> = atoms.iter().filter_map(resolve).collect();
                groups.push(resolved);
            }
        }
    }
    if !run.is_empty() {
        groups.push(run);
    }

    groups
}
