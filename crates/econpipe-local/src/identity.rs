//! Deterministic record fingerprints.
//!
//! A record's fingerprint is derived from its best natural identifier, tried in order:
//! external id, DOI, arXiv id, normalized URL, then `title|source|date`.
//! The identifier string is hashed with SHA-256 and the first 16 bytes are laid out as a
//! version-4/RFC 4122 variant UUID. Same identifier, same fingerprint.

use econpipe_core::RawRecord;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Query parameters that only carry attribution, never content identity.
const TRACKING_PARAMS: [&str; 11] = [
    "gclid", "fbclid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid", "yclid", "msclkid",
    "_hsenc", "_hsmi",
];

fn doi_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b10\.\d{4,9}/[^\s"'<>?#&]+"#).ok())
        .as_ref()
}

fn arxiv_version_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"v\d+$").ok()).as_ref()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(|s| s.trim()).filter(|s| !s.is_empty())
}

pub fn extract_doi(text: &str) -> Option<String> {
    let m = doi_re()?.find(text)?;
    let doi = m
        .as_str()
        .trim_end_matches(['.', ',', ';', ':', ')', ']', '}'])
        .to_ascii_lowercase();
    (!doi.is_empty()).then_some(doi)
}

pub fn extract_arxiv_id(url: &str) -> Option<String> {
    // Examples:
    // - https://arxiv.org/abs/2401.01234v2
    // - http://arxiv.org/abs/cs/9901001v1
    // - https://arxiv.org/pdf/2401.01234.pdf
    let u = url::Url::parse(url.trim()).ok()?;
    let host = u.host_str()?.to_ascii_lowercase();
    if !(host == "arxiv.org" || host.ends_with(".arxiv.org")) {
        return None;
    }
    let path = u.path();
    let tail = path
        .strip_prefix("/abs/")
        .or_else(|| path.strip_prefix("/pdf/"))?;
    let id = tail.trim_matches('/').trim_end_matches(".pdf");
    let id = arxiv_version_re()?.replace(id, "");
    (!id.is_empty()).then(|| id.to_ascii_lowercase())
}

/// Scheme and host lowercased, fragment dropped, trailing slash stripped, tracking parameters
/// removed, remaining parameters sorted.
pub fn normalize_url(url: &str) -> Option<String> {
    let u = url::Url::parse(url.trim()).ok()?;
    let host = u.host_str()?;
    let mut out = format!("{}://{}", u.scheme(), host.to_ascii_lowercase());
    if let Some(port) = u.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(u.path().trim_end_matches('/'));

    let mut pairs: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !(k.starts_with("utm_") || TRACKING_PARAMS.contains(&k.as_str()))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let q = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&q);
    }
    Some(out)
}

/// The namespaced identifier a fingerprint is computed from.
pub fn natural_key(r: &RawRecord) -> String {
    if let Some(ext) = non_empty(r.external_id.as_deref()) {
        return format!("ext:{ext}");
    }
    if let Some(doi) = extract_doi(&r.url).or_else(|| extract_doi(&r.content)) {
        return format!("doi:{doi}");
    }
    if let Some(aid) = extract_arxiv_id(&r.url) {
        return format!("arxiv:{aid}");
    }
    if let Some(u) = non_empty(Some(r.url.as_str())).and_then(normalize_url) {
        return format!("url:{u}");
    }
    // Records with no title/source/date collapse onto one key; they carry nothing to tell
    // them apart.
    format!(
        "meta:{}|{}|{}",
        r.title.trim().to_lowercase(),
        r.source.as_deref().unwrap_or("").trim().to_lowercase(),
        r.date.as_deref().unwrap_or("").trim()
    )
}

/// First 16 bytes of SHA-256, formatted as a version-4 / RFC 4122 variant UUID.
pub fn fingerprint(natural_key: &str) -> String {
    let digest = Sha256::digest(natural_key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

pub fn result_id(r: &RawRecord) -> String {
    fingerprint(&natural_key(r))
}
