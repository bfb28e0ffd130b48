use crate::error::PictorError;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;
use url::{Host, Url};

/// Longest URL the service accepts, inclusive.
pub const MAX_URL_LEN: usize = 4096;

/// IPv4 ranges that must never be fetched: RFC1918, loopback, link-local,
/// CGNAT, benchmarking, documentation, multicast, reserved, and 0/8.
static PRIVATE_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
    ]
    .iter()
    .map(|s| s.parse().expect("static CIDR table"))
    .collect()
});

/// Case-insensitive exact-match set of upstream hosts the service may fetch
/// from. No suffix or wildcard matching.
#[derive(Debug, Clone)]
pub struct HostAllowlist {
    hosts: HashSet<String>,
}

impl HostAllowlist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(&host.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Gate a candidate upstream URL. The gates run in a fixed order so a given
/// URL always fails with the same code.
pub fn validate_url(raw: &str, allowed: &HostAllowlist) -> Result<Url, PictorError> {
    if raw.is_empty() {
        return Err(PictorError::MissingUrl);
    }
    if raw.len() > MAX_URL_LEN {
        return Err(PictorError::UrlTooLong);
    }
    let parsed = Url::parse(raw).map_err(|e| PictorError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "https" {
        return Err(PictorError::HttpsRequired);
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(PictorError::CredentialsInUrl);
    }
    let host = parsed
        .host()
        .ok_or_else(|| PictorError::InvalidUrl("URL has no host".to_string()))?;
    if host_is_private(&host) {
        return Err(PictorError::PrivateHost(host.to_string()));
    }
    let host_str = host.to_string();
    if !allowed.contains(&host_str) {
        return Err(PictorError::DomainNotAllowed(host_str));
    }
    Ok(parsed)
}

fn host_is_private(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => domain_is_private(d),
        Host::Ipv4(a) => ipv4_is_private(*a),
        Host::Ipv6(a) => ipv6_is_private(*a),
    }
}

fn domain_is_private(domain: &str) -> bool {
    let d = domain.trim_end_matches('.').to_ascii_lowercase();
    if d == "localhost" || d.ends_with(".local") || d.ends_with(".internal") {
        return true;
    }
    // Dotted-decimal hostnames the URL parser left as domains still get the
    // strict IPv4 treatment; anything with leading-zero octets is not an
    // address for us and falls through to the allowlist gate.
    match parse_strict_ipv4(&d) {
        Some(ip) => ipv4_is_private(ip),
        None => false,
    }
}

/// Strict dotted-decimal IPv4 parser. Exactly four decimal octets, no empty
/// parts, no leading zeros — leading-zero octets are rejected outright to
/// foreclose octal-interpretation bypasses.
pub fn parse_strict_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut count = 0usize;
    for part in s.split('.') {
        if count == 4 {
            return None;
        }
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if part.len() > 1 && part.starts_with('0') {
            return None;
        }
        let v: u16 = part.parse().ok()?;
        if v > 255 {
            return None;
        }
        octets[count] = v as u8;
        count += 1;
    }
    if count != 4 {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

fn ipv4_is_private(ip: Ipv4Addr) -> bool {
    PRIVATE_V4.iter().any(|net| net.contains(&ip))
}

fn ipv6_is_private(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_is_private(v4);
    }
    let seg0 = ip.segments()[0];
    // fc00::/7 (unique local) and fe80::/10 (link local)
    (seg0 & 0xfe00) == 0xfc00 || (seg0 & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(hosts: &[&str]) -> HostAllowlist {
        HostAllowlist::new(hosts.iter().copied())
    }

    fn default_allow() -> HostAllowlist {
        allow(&[
            "prod-files-secure.s3.us-west-2.amazonaws.com",
            "s3.us-west-2.amazonaws.com",
            "file.notion.so",
        ])
    }

    fn code_of(raw: &str) -> &'static str {
        validate_url(raw, &default_allow()).unwrap_err().code()
    }

    // ── Gate order ───────────────────────────────────────────────

    #[test]
    fn empty_url_is_missing() {
        assert_eq!(code_of(""), "MISSING_URL");
    }

    #[test]
    fn overlong_url_is_rejected_before_parsing() {
        let long = format!("https://file.notion.so/{}", "a".repeat(MAX_URL_LEN));
        assert_eq!(code_of(&long), "URL_TOO_LONG");
    }

    #[test]
    fn url_of_exactly_max_len_passes_the_length_gate() {
        let pad = MAX_URL_LEN - "https://file.notion.so/".len();
        let url = format!("https://file.notion.so/{}", "a".repeat(pad));
        assert_eq!(url.len(), MAX_URL_LEN);
        assert!(validate_url(&url, &default_allow()).is_ok());
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(code_of("not a url at all"), "INVALID_URL");
    }

    #[test]
    fn http_is_rejected() {
        assert_eq!(code_of("http://file.notion.so/x"), "HTTPS_REQUIRED");
    }

    #[test]
    fn embedded_credentials_are_rejected() {
        assert_eq!(code_of("https://user:pw@file.notion.so/x"), "CREDENTIALS_IN_URL");
        assert_eq!(code_of("https://user@file.notion.so/x"), "CREDENTIALS_IN_URL");
    }

    #[test]
    fn unknown_domain_is_rejected() {
        assert_eq!(code_of("https://evil.example/x"), "DOMAIN_NOT_ALLOWED");
    }

    #[test]
    fn allowlist_match_is_case_insensitive_and_exact() {
        assert!(validate_url("https://FILE.NOTION.SO/x", &default_allow()).is_ok());
        // No suffix matching: a sub-host of an allowed domain is not allowed.
        assert_eq!(code_of("https://sub.file.notion.so/x"), "DOMAIN_NOT_ALLOWED");
    }

    #[test]
    fn validation_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(code_of("http://file.notion.so/x"), "HTTPS_REQUIRED");
            assert_eq!(code_of("https://10.1.2.3/x"), "PRIVATE_HOST");
        }
    }

    // ── Private hosts ────────────────────────────────────────────

    #[test]
    fn localhost_and_internal_names_are_private() {
        for host in [
            "localhost",
            "LOCALHOST",
            "printer.local",
            "db.prod.internal",
        ] {
            let url = format!("https://{host}/x");
            assert_eq!(code_of(&url), "PRIVATE_HOST", "{host}");
        }
    }

    #[test]
    fn private_ipv4_ranges_are_rejected() {
        for ip in [
            "0.1.2.3",
            "10.0.0.1",
            "100.64.0.1",
            "100.127.255.254",
            "127.0.0.1",
            "169.254.169.254",
            "172.16.0.1",
            "172.31.255.255",
            "192.0.0.5",
            "192.0.2.10",
            "192.168.1.1",
            "198.18.0.1",
            "198.19.255.255",
            "198.51.100.7",
            "203.0.113.9",
            "224.0.0.1",
            "240.0.0.1",
            "255.255.255.255",
        ] {
            let url = format!("https://{ip}/x");
            assert_eq!(code_of(&url), "PRIVATE_HOST", "{ip}");
        }
    }

    #[test]
    fn public_ipv4_is_not_private_but_still_needs_allowlisting() {
        assert_eq!(code_of("https://93.184.216.34/x"), "DOMAIN_NOT_ALLOWED");
        assert_eq!(code_of("https://100.63.255.255/x"), "DOMAIN_NOT_ALLOWED");
        assert_eq!(code_of("https://172.32.0.1/x"), "DOMAIN_NOT_ALLOWED");
    }

    #[test]
    fn private_ipv6_is_rejected() {
        for host in [
            "[::1]",
            "[::]",
            "[fc00::1]",
            "[fdff:abcd::1]",
            "[fe80::1]",
            "[::ffff:10.0.0.1]",
            "[::ffff:127.0.0.1]",
        ] {
            let url = format!("https://{host}/x");
            assert_eq!(code_of(&url), "PRIVATE_HOST", "{host}");
        }
    }

    #[test]
    fn public_ipv6_is_not_private() {
        assert_eq!(code_of("https://[2606:4700::6810:85e5]/x"), "DOMAIN_NOT_ALLOWED");
    }

    // ── Strict IPv4 parser ───────────────────────────────────────

    #[test]
    fn strict_parser_accepts_plain_dotted_decimal() {
        assert_eq!(parse_strict_ipv4("10.0.0.1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parse_strict_ipv4("0.0.0.0"), Some(Ipv4Addr::new(0, 0, 0, 0)));
        assert_eq!(
            parse_strict_ipv4("255.255.255.255"),
            Some(Ipv4Addr::new(255, 255, 255, 255))
        );
    }

    #[test]
    fn strict_parser_rejects_leading_zero_octets() {
        assert_eq!(parse_strict_ipv4("0177.0.0.1"), None);
        assert_eq!(parse_strict_ipv4("127.000.000.001"), None);
        assert_eq!(parse_strict_ipv4("010.0.0.1"), None);
    }

    #[test]
    fn strict_parser_rejects_malformed_shapes() {
        for s in [
            "1.2.3",
            "1.2.3.4.5",
            "1..2.3",
            "1.2.3.256",
            "1.2.3.4444",
            "a.b.c.d",
            "1.2.3.4 ",
            "",
        ] {
            assert_eq!(parse_strict_ipv4(s), None, "{s:?}");
        }
    }

    // ── Allowlist type ───────────────────────────────────────────

    #[test]
    fn allowlist_normalizes_case_and_whitespace() {
        let list = allow(&[" File.Notion.So ", ""]);
        assert!(list.contains("file.notion.so"));
        assert!(list.contains("FILE.NOTION.SO"));
        assert!(!list.contains(""));
    }
}
