use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration.
///
/// Loaded from a YAML file (default `config.yaml`, override with the
/// `MEDIAWARP_CONFIG` environment variable), then overridden by
/// `MEDIAWARP__`-prefixed environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub media_server: MediaServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub http_strm: HttpStrmConfig,
    pub alist_strm: AlistStrmConfig,
    pub web: WebConfig,
    pub subtitle: SubtitleConfig,
    pub client_filter: ClientFilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

/// Which media-server family sits behind the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaServerKind {
    Emby,
    Jellyfin,
    Fntv,
}

impl std::fmt::Display for MediaServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emby => write!(f, "emby"),
            Self::Jellyfin => write!(f, "jellyfin"),
            Self::Fntv => write!(f, "fntv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    #[serde(rename = "type")]
    pub kind: MediaServerKind,
    pub addr: String,
    pub api_key: String,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            kind: MediaServerKind::Emby,
            addr: "http://127.0.0.1:8096".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Sizing and TTL policy for the in-memory response caches.
///
/// All TTLs are in seconds; a TTL of 0 disables that cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enable: bool,
    /// Hard per-cache memory ceiling in MiB.
    pub max_memory_mb: usize,
    pub shards: usize,
    pub max_entries_per_shard: usize,
    pub image_ttl: u64,
    pub subtitle_ttl: u64,
    pub alist_api_ttl: u64,
    pub http_strm_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_memory_mb: 10,
            shards: 256,
            max_entries_per_shard: 500,
            image_ttl: 86_400,
            subtitle_ttl: 86_400,
            alist_api_ttl: 600,
            http_strm_ttl: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStrmConfig {
    pub enable: bool,
    /// Follow redirects of the STRM URL to a terminal URL and cache it.
    pub final_url: bool,
}

impl Default for HttpStrmConfig {
    fn default() -> Self {
        Self {
            enable: true,
            final_url: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlistStrmConfig {
    pub enable: bool,
    /// Prefer the storage raw URL over the signed `/d/...` URL.
    pub raw_url: bool,
    pub list: Vec<AlistUpstreamConfig>,
}

/// One configured Alist server and the library prefixes mounted on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlistUpstreamConfig {
    pub addr: String,
    pub username: String,
    pub password: String,
    /// Optional seed token; used until a request fails.
    pub token: Option<String>,
    pub prefix_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enable: bool,
    /// Serve a local `index.html` instead of fetching it upstream.
    pub index: bool,
    /// Raw HTML spliced in before `</head>`.
    pub head: String,
    /// Serve the custom static directory at `/MediaWarp/custom`.
    pub custom: bool,
    pub custom_dir: String,
    pub crx: bool,
    pub actor_plus: bool,
    pub fanart_show: bool,
    pub external_player_url: bool,
    pub danmaku: bool,
    pub video_together: bool,
    pub robots: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enable: false,
            index: false,
            head: String::new(),
            custom: false,
            custom_dir: "./custom".to_string(),
            crx: false,
            actor_plus: false,
            fanart_show: false,
            external_player_url: false,
            danmaku: false,
            video_together: false,
            robots: String::new(),
        }
    }
}

impl WebConfig {
    /// Whether the index rewriter has anything to do.
    pub fn wants_index_rewrite(&self) -> bool {
        self.enable
            && (self.index
                || !self.head.is_empty()
                || self.external_player_url
                || self.video_together)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub enable: bool,
    pub srt2ass: bool,
    /// Extra `[V4+ Styles]` lines for converted subtitles.
    pub ass_style: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientFilterConfig {
    pub enable: bool,
    pub mode: FilterMode,
    /// User-Agent substrings the mode applies to.
    pub client_list: Vec<String>,
}

impl Default for ClientFilterConfig {
    fn default() -> Self {
        Self {
            enable: false,
            mode: FilterMode::Allow,
            client_list: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("MEDIAWARP_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("MEDIAWARP").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// Normalize a server address into an endpoint without a trailing slash.
pub fn trim_endpoint(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_string()
}
