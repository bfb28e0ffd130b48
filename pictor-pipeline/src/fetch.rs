use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use pictor_core::validate::validate_url;
use pictor_core::{HostAllowlist, PictorError};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

const USER_AGENT_VALUE: &str = concat!("pictor/", env!("CARGO_PKG_VERSION"));
const ACCEPT_VALUE: &str = "image/*";

/// Maximum redirect hops the fetcher will chase.
pub const MAX_REDIRECT_HOPS: usize = 5;

/// A successful upstream fetch: the full body plus its normalised content
/// type and the byte count before any optimization.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub original_size: u64,
}

/// Bounded upstream HTTP client.
///
/// Redirects are chased manually so every hop can be re-validated against
/// the allowlist and the private-host gates; reqwest's own policy is
/// disabled. No client headers are forwarded — the request carries exactly
/// a static User-Agent and `Accept: image/*`.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Fetch `url` under one deadline covering DNS, connect, TLS, the whole
    /// redirect chain and the body read.
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: u64,
        allowed: &HostAllowlist,
    ) -> Result<FetchedImage, PictorError> {
        match tokio::time::timeout(timeout, self.fetch_inner(url, max_bytes, allowed)).await {
            Ok(result) => result,
            Err(_) => Err(PictorError::UpstreamTimeout),
        }
    }

    async fn fetch_inner(
        &self,
        url: &str,
        max_bytes: u64,
        allowed: &HostAllowlist,
    ) -> Result<FetchedImage, PictorError> {
        let mut current = Url::parse(url).map_err(|e| PictorError::InvalidUrl(e.to_string()))?;

        for hop in 0..=MAX_REDIRECT_HOPS {
            let response = self
                .client
                .get(current.clone())
                .header(USER_AGENT, USER_AGENT_VALUE)
                .header(ACCEPT, ACCEPT_VALUE)
                .send()
                .await
                .map_err(|e| PictorError::FetchFailed(e.to_string()))?;

            let status = response.status();
            if is_redirect(status) {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(PictorError::InvalidRedirect)?;
                let next = current
                    .join(location)
                    .map_err(|_| PictorError::InvalidRedirect)?;
                if let Err(gate) = validate_url(next.as_str(), allowed) {
                    debug!(code = gate.code(), target = %next, "redirect target rejected");
                    return Err(PictorError::RedirectBlocked(
                        next.host_str().unwrap_or("<no host>").to_string(),
                    ));
                }
                debug!(hop, from = %current, to = %next, "following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(upstream_error(status));
            }

            return read_body(response, max_bytes).await;
        }

        Err(PictorError::TooManyRedirects)
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Upstream 403 is remapped to 502 so expired-signature responses don't
/// leak authentication details; every other status is relayed.
fn upstream_error(status: StatusCode) -> PictorError {
    let status = status.as_u16();
    PictorError::Upstream {
        status: if status == 403 { 502 } else { status },
    }
}

async fn read_body(response: reqwest::Response, max_bytes: u64) -> Result<FetchedImage, PictorError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(normalize_content_type)
        .unwrap_or_default();
    if !content_type.starts_with("image/") {
        return Err(PictorError::InvalidContentType(content_type));
    }

    // Fail fast on a declared oversize; the declared length is otherwise
    // never trusted — the stream is metered as it arrives.
    if let Some(declared) = response.content_length() {
        if declared > max_bytes {
            return Err(PictorError::ImageTooLarge);
        }
    }

    let mut buf = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PictorError::FetchFailed(format!("body read: {e}")))?;
        if buf.len() as u64 + chunk.len() as u64 > max_bytes {
            return Err(PictorError::ImageTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.is_empty() {
        return Err(PictorError::EmptyBody);
    }

    let original_size = buf.len() as u64;
    Ok(FetchedImage {
        bytes: buf.freeze(),
        content_type,
        original_size,
    })
}

/// Strip parameters and lowercase: `image/JPEG; charset=x` → `image/jpeg`.
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
