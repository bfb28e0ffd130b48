use crate::cache_key;
use percent_encoding::percent_decode_str;
use url::Url;

/// Direct file host of the document platform.
const DIRECT_HOST: &str = "file.notion.so";
/// CDN front that embeds the real object URL as an encoded path segment.
const FRONT_HOST: &str = "www.notion.so";

/// A structurally recognised upstream URL.
///
/// `base_url` is the identity used for cache keying (query string stripped;
/// for the CDN-front family it is the *inner* object URL, so the front and
/// the direct S3 link share one cache prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpstreamUrl {
    pub workspace_id: String,
    pub block_id: String,
    pub filename: String,
    pub base_url: String,
    pub full_url: String,
}

/// Extract `(workspace, block, filename)` from the known upstream hostname
/// families. Pure and total: anything that does not match a known shape
/// yields `None` and the caller proceeds with an opaque base URL.
///
/// Recognised families:
/// - virtual-hosted S3: `<bucket>.s3.<region>.amazonaws.com/<ws>/<block>/<file>`
/// - path-style S3: `s3.<region>.amazonaws.com/<bucket>/<ws>/<block>/<file>`
/// - platform direct link: `file.notion.so/f/<ws>/<block>/<file>`
/// - CDN front: `www.notion.so/image/<url-encoded object URL>`
pub fn parse_upstream_url(raw: &str) -> Option<ParsedUpstreamUrl> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if host == FRONT_HOST {
        return parse_front(raw, &parsed);
    }

    let triple = if is_virtual_hosted_s3(&host) {
        match segments.as_slice() {
            [ws, block, file] => Some((*ws, *block, *file)),
            _ => None,
        }
    } else if is_path_style_s3(&host) {
        match segments.as_slice() {
            [_bucket, ws, block, file] => Some((*ws, *block, *file)),
            _ => None,
        }
    } else if host == DIRECT_HOST {
        match segments.as_slice() {
            ["f", ws, block, file] => Some((*ws, *block, *file)),
            _ => None,
        }
    } else {
        None
    };

    let (ws, block, file) = triple?;
    Some(ParsedUpstreamUrl {
        workspace_id: ws.to_string(),
        block_id: block.to_string(),
        filename: file.to_string(),
        base_url: cache_key::base_url(raw),
        full_url: raw.to_string(),
    })
}

/// `www.notion.so/image/<encoded>`: unwrap the encoded inner object URL and
/// parse that instead. The outer URL is kept as `full_url`; identity follows
/// the inner object.
fn parse_front(raw: &str, parsed: &Url) -> Option<ParsedUpstreamUrl> {
    let path = parsed.path();
    let encoded = path.strip_prefix("/image/")?;
    if encoded.is_empty() {
        return None;
    }
    let inner = percent_decode_str(encoded).decode_utf8().ok()?;
    let mut out = parse_upstream_url(&inner)?;
    out.full_url = raw.to_string();
    Some(out)
}

fn is_virtual_hosted_s3(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    matches!(labels.as_slice(), [bucket, "s3", _region, "amazonaws", "com"] if !bucket.is_empty())
}

fn is_path_style_s3(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    matches!(labels.as_slice(), ["s3", _region, "amazonaws", "com"])
}
