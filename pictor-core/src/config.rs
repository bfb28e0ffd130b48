use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the Pictor image CDN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictorConfig {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Log level filter (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Persistent store (L3) configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Edge cache (L2) configuration
    #[serde(default)]
    pub edge: EdgeConfig,

    /// Upstream fetch configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// HTTP surface configuration (rate limiting, CORS, API keys)
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listener port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selector: fs (local filesystem), s3, or r2
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Root directory for the filesystem backend
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Bucket name (s3 / r2)
    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Region (s3; r2 uses "auto")
    #[serde(default)]
    pub s3_region: Option<String>,

    /// Custom endpoint URL (required for r2)
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    /// Static access key
    #[serde(default)]
    pub s3_access_key: Option<String>,

    /// Static secret key
    #[serde(default)]
    pub s3_secret_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Fs,
    S3,
    R2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// When set, the edge cache is a shared Redis instead of the in-process LRU
    #[serde(default)]
    pub redis_url: Option<String>,

    /// In-process LRU: maximum entry count
    #[serde(default = "default_edge_max_entries")]
    pub max_entries: usize,

    /// In-process LRU: maximum total bytes
    #[serde(default = "default_edge_max_bytes")]
    pub max_bytes: u64,

    /// TTL applied to edge entries on insert (seconds)
    #[serde(default = "default_edge_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Hosts the fetcher may contact (case-insensitive exact match)
    #[serde(default = "default_allowed_domains", deserialize_with = "comma_list")]
    pub allowed_domains: Vec<String>,

    /// Hard cap on fetched body size (bytes)
    #[serde(default = "default_max_image_size")]
    pub max_image_size_bytes: u64,

    /// Deadline covering the whole upstream call, redirects included (ms)
    #[serde(default = "default_upstream_timeout")]
    pub timeout_ms: u64,

    /// Host used to reconstruct upstream URLs for the stable-path route
    #[serde(default = "default_canonical_host")]
    pub canonical_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-IP request budget per minute (0 disables limiting)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// CORS allowed origins ("*" for any)
    #[serde(default = "default_cors_origins", deserialize_with = "comma_list")]
    pub cors_origins: Vec<String>,

    /// Require an API key on the /api/v1 namespace
    #[serde(default)]
    pub api_keys_enabled: bool,

    /// Accepted API keys
    #[serde(default, deserialize_with = "comma_list")]
    pub api_keys: Vec<String>,

    /// s-maxage advertised to shared caches (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl PictorConfig {
    /// Load configuration from a YAML file plus environment variables.
    ///
    /// Env can address any field as `PICTOR_SECTION__FIELD`; the short
    /// operational names (PORT, STORAGE_BACKEND, ALLOWED_DOMAINS, ...) are
    /// mapped onto the nested structure as overrides.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["pictor.yaml", "/etc/pictor/pictor.yaml", "config/pictor.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment
            .merge(Env::prefixed("PICTOR_").split("__"))
            .merge(flat_env());

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Failures here are fatal by design: a half-wired
    /// object store must abort rather than serve and silently drop writes.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self
            .upstream
            .allowed_domains
            .iter()
            .all(|d| d.trim().is_empty())
        {
            anyhow::bail!("ALLOWED_DOMAINS must list at least one upstream host");
        }
        if self.upstream.max_image_size_bytes == 0 {
            anyhow::bail!("MAX_IMAGE_SIZE_BYTES must be greater than zero");
        }
        if self.upstream.timeout_ms == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_MS must be greater than zero");
        }
        match self.storage.backend {
            StorageBackendKind::Fs => {}
            StorageBackendKind::S3 | StorageBackendKind::R2 => {
                if self.storage.s3_bucket.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("S3_BUCKET is required for the {} backend", self.backend_name());
                }
                if self.storage.s3_access_key.as_deref().unwrap_or("").is_empty()
                    || self.storage.s3_secret_key.as_deref().unwrap_or("").is_empty()
                {
                    anyhow::bail!(
                        "S3_ACCESS_KEY and S3_SECRET_KEY are required for the {} backend",
                        self.backend_name()
                    );
                }
                if self.storage.backend == StorageBackendKind::R2
                    && self.storage.s3_endpoint.as_deref().unwrap_or("").is_empty()
                {
                    anyhow::bail!("S3_ENDPOINT is required for the r2 backend");
                }
            }
        }
        if self.http.api_keys_enabled && self.http.api_keys.is_empty() {
            anyhow::bail!("API_KEYS_ENABLED is set but API_KEYS is empty");
        }
        Ok(())
    }

    pub fn backend_name(&self) -> &'static str {
        match self.storage.backend {
            StorageBackendKind::Fs => "fs",
            StorageBackendKind::S3 => "s3",
            StorageBackendKind::R2 => "r2",
        }
    }

    /// `host:port` string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// The short env names documented for operators, mapped onto nested fields.
fn flat_env() -> Env {
    Env::raw()
        .only(&[
            "PORT",
            "HOST",
            "LOG_LEVEL",
            "STORAGE_BACKEND",
            "CACHE_DIR",
            "REDIS_URL",
            "S3_BUCKET",
            "S3_REGION",
            "S3_ENDPOINT",
            "S3_ACCESS_KEY",
            "S3_SECRET_KEY",
            "ALLOWED_DOMAINS",
            "MAX_IMAGE_SIZE_BYTES",
            "UPSTREAM_TIMEOUT_MS",
            "RATE_LIMIT_PER_MINUTE",
            "CORS_ORIGINS",
            "API_KEYS_ENABLED",
            "API_KEYS",
        ])
        .map(|key| {
            let key = key.as_str().to_ascii_uppercase();
            let mapped: &'static str = match key.as_str() {
                "PORT" => "server.port",
                "HOST" => "server.host",
                "LOG_LEVEL" => "log_level",
                "STORAGE_BACKEND" => "storage.backend",
                "CACHE_DIR" => "storage.cache_dir",
                "REDIS_URL" => "edge.redis_url",
                "S3_BUCKET" => "storage.s3_bucket",
                "S3_REGION" => "storage.s3_region",
                "S3_ENDPOINT" => "storage.s3_endpoint",
                "S3_ACCESS_KEY" => "storage.s3_access_key",
                "S3_SECRET_KEY" => "storage.s3_secret_key",
                "ALLOWED_DOMAINS" => "upstream.allowed_domains",
                "MAX_IMAGE_SIZE_BYTES" => "upstream.max_image_size_bytes",
                "UPSTREAM_TIMEOUT_MS" => "upstream.timeout_ms",
                "RATE_LIMIT_PER_MINUTE" => "http.rate_limit_per_minute",
                "CORS_ORIGINS" => "http.cors_origins",
                "API_KEYS_ENABLED" => "http.api_keys_enabled",
                "API_KEYS" => "http.api_keys",
                other => return other.to_string().into(),
            };
            mapped.into()
        })
        .split(".")
}

/// Accept either a YAML/JSON sequence or a single comma-separated string
/// (the shape env vars arrive in).
fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Str(String),
    }

    Ok(match ListOrString::deserialize(deserializer)? {
        ListOrString::List(v) => v,
        ListOrString::Str(s) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
    })
}

// Default implementations

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Fs,
            cache_dir: default_cache_dir(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            max_entries: default_edge_max_entries(),
            max_bytes: default_edge_max_bytes(),
            ttl_secs: default_edge_ttl(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
            max_image_size_bytes: default_max_image_size(),
            timeout_ms: default_upstream_timeout(),
            canonical_host: default_canonical_host(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
            cors_origins: default_cors_origins(),
            api_keys_enabled: false,
            api_keys: vec![],
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for PictorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            edge: EdgeConfig::default(),
            upstream: UpstreamConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

// Serde default functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_edge_max_entries() -> usize {
    1000
}

fn default_edge_max_bytes() -> u64 {
    512 * 1024 * 1024 // 512 MiB
}

fn default_edge_ttl() -> u64 {
    3600
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "prod-files-secure.s3.us-west-2.amazonaws.com".to_string(),
        "s3.us-west-2.amazonaws.com".to_string(),
        "file.notion.so".to_string(),
    ]
}

fn default_max_image_size() -> u64 {
    25 * 1024 * 1024 // 25 MiB
}

fn default_upstream_timeout() -> u64 {
    15_000
}

fn default_canonical_host() -> String {
    "prod-files-secure.s3.us-west-2.amazonaws.com".to_string()
}

fn default_rate_limit() -> u32 {
    120
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cache_ttl() -> u64 {
    86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PictorConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.storage.backend, StorageBackendKind::Fs);
        assert_eq!(cfg.upstream.max_image_size_bytes, 25 * 1024 * 1024);
        assert_eq!(cfg.upstream.timeout_ms, 15_000);
        assert_eq!(cfg.upstream.allowed_domains.len(), 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_object_store_without_bucket_is_fatal() {
        let mut cfg = PictorConfig::default();
        cfg.storage.backend = StorageBackendKind::S3;
        assert!(cfg.validate().is_err());

        cfg.storage.s3_bucket = Some("images".into());
        assert!(cfg.validate().is_err(), "credentials still missing");

        cfg.storage.s3_access_key = Some("ak".into());
        cfg.storage.s3_secret_key = Some("sk".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_r2_requires_endpoint() {
        let mut cfg = PictorConfig::default();
        cfg.storage.backend = StorageBackendKind::R2;
        cfg.storage.s3_bucket = Some("images".into());
        cfg.storage.s3_access_key = Some("ak".into());
        cfg.storage.s3_secret_key = Some("sk".into());
        assert!(cfg.validate().is_err());

        cfg.storage.s3_endpoint = Some("https://accountid.r2.cloudflarestorage.com".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_allowlist_is_fatal() {
        let mut cfg = PictorConfig::default();
        cfg.upstream.allowed_domains = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_api_keys_enabled_without_keys_is_fatal() {
        let mut cfg = PictorConfig::default();
        cfg.http.api_keys_enabled = true;
        assert!(cfg.validate().is_err());
        cfg.http.api_keys = vec!["k1".into()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_comma_separated_lists_deserialize() {
        let cfg: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "allowed_domains": "a.example.com, b.example.com,,  "
        }))
        .unwrap();
        assert_eq!(cfg.allowed_domains, vec!["a.example.com", "b.example.com"]);

        let cfg: HttpConfig = serde_json::from_value(serde_json::json!({
            "api_keys": ["k1", "k2"]
        }))
        .unwrap();
        assert_eq!(cfg.api_keys, vec!["k1", "k2"]);
    }

    #[test]
    fn test_backend_kind_parses_lowercase() {
        let cfg: StorageConfig =
            serde_json::from_value(serde_json::json!({ "backend": "r2" })).unwrap();
        assert_eq!(cfg.backend, StorageBackendKind::R2);
    }
}
