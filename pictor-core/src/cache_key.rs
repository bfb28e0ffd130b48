use crate::options::TransformOptions;
use sha2::{Digest, Sha256};

/// Content-addressed cache key: `sha256(base_url)/variant_suffix`.
///
/// The base URL is the upstream URL with its query string removed, so the
/// volatile signature never enters the key; replaying the same object with a
/// fresh signature hits the same entry.
pub fn cache_key(base_url: &str, opts: &TransformOptions) -> String {
    format!("{}/{}", hash_base(base_url), variant_suffix(opts))
}

/// The per-image prefix shared by every variant of one source image.
/// Deleting by this prefix invalidates the image wholesale.
pub fn cache_prefix(base_url: &str) -> String {
    format!("{}/", hash_base(base_url))
}

/// Strip the query string (and fragment) from an upstream URL, yielding the
/// identity used for cache keying. Falls back to the raw string when the
/// URL does not parse; hashing is total either way.
pub fn base_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            let s = u.to_string();
            s.trim_end_matches('?').to_string()
        }
        Err(_) => raw.split(['?', '#']).next().unwrap_or(raw).to_string(),
    }
}

fn hash_base(base_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic suffix encoding the transform directives, in fixed order:
/// `wN`, `hN`, `fFMT` (omitted for `original`), `qN`, `fitMODE`, joined by
/// `_`. All-empty directives collapse to `original`.
fn variant_suffix(opts: &TransformOptions) -> String {
    let opts = opts.normalized();
    let mut parts: Vec<String> = Vec::with_capacity(5);
    if let Some(w) = opts.width {
        parts.push(format!("w{w}"));
    }
    if let Some(h) = opts.height {
        parts.push(format!("h{h}"));
    }
    if let Some(f) = opts.format {
        parts.push(format!("f{}", f.as_str()));
    }
    if let Some(q) = opts.quality {
        parts.push(format!("q{q}"));
    }
    if let Some(fit) = opts.fit {
        parts.push(format!("fit{}", fit.as_str()));
    }
    if parts.is_empty() {
        "original".to_string()
    } else {
        parts.join("_")
    }
}
