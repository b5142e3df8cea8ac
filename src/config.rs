//! Configuration types for the IOC reputation agent.

use crate::normalize::normalize;
use ipnet::{IpNet, Ipv4Net};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration for the IOC reputation agent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Feed ingestion schedule and HTTP limits.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Stale record expiry.
    #[serde(default)]
    pub pruning: PruningConfig,

    /// Threat intelligence feeds.
    #[serde(default)]
    pub feeds: Vec<FeedDescriptor>,

    /// IPs and networks that are never reported as malicious.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch. When off, every lookup is benign.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log malicious verdicts.
    #[serde(default = "default_true")]
    pub log_malicious: bool,

    /// Log benign verdicts.
    #[serde(default)]
    pub log_benign: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_malicious: true,
            log_benign: false,
        }
    }
}

/// Feed ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// How often every enabled feed is fetched (seconds).
    #[serde(default = "default_ingestion_interval")]
    pub interval_seconds: u64,

    /// Per-feed HTTP timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Largest feed body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// User-Agent sent to feed endpoints.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl IngestionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_ingestion_interval(),
            timeout_ms: default_timeout(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_ingestion_interval() -> u64 {
    900
}

fn default_timeout() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_user_agent() -> String {
    concat!("zentinel-agent-ioc-reputation/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Stale record expiry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PruningConfig {
    /// How often the store is pruned (seconds).
    #[serde(default = "default_prune_interval")]
    pub interval_seconds: u64,

    /// Records not seen by any feed for longer than this are removed (seconds).
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

impl PruningConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_prune_interval(),
            max_age_seconds: default_max_age(),
        }
    }
}

fn default_prune_interval() -> u64 {
    3600
}

fn default_max_age() -> u64 {
    86_400
}

/// Static description of one threat intelligence feed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FeedDescriptor {
    /// Unique name for logging.
    pub name: String,

    /// HTTP(S) URL the feed is fetched from (supports ${ENV_VAR} syntax).
    pub endpoint: String,

    /// Body format.
    #[serde(default)]
    pub format: FeedFormat,

    /// Disabled feeds are never fetched.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Feed body format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedFormat {
    /// Newline-delimited text, one IP per line.
    #[default]
    Plain,
    /// JSON array (or object) of entries, each carrying a nested list of IPs.
    Json {
        /// Dot-separated path from an entry to its IP list.
        #[serde(default = "default_ip_field")]
        ip_field: String,
    },
}

fn default_ip_field() -> String {
    "ips".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ingestion.interval_seconds == 0 {
            anyhow::bail!("ingestion.interval_seconds must be > 0");
        }
        if self.ingestion.timeout_ms == 0 {
            anyhow::bail!("ingestion.timeout_ms must be > 0");
        }
        if self.ingestion.max_body_bytes == 0 {
            anyhow::bail!("ingestion.max_body_bytes must be > 0");
        }
        if self.pruning.interval_seconds == 0 {
            anyhow::bail!("pruning.interval_seconds must be > 0");
        }
        if self.pruning.max_age_seconds == 0 {
            anyhow::bail!("pruning.max_age_seconds must be > 0");
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                anyhow::bail!("Feed with endpoint '{}' has an empty name", feed.endpoint);
            }
            if !names.insert(feed.name.as_str()) {
                anyhow::bail!("Duplicate feed name: {}", feed.name);
            }

            let url = Url::parse(&feed.endpoint).map_err(|e| {
                anyhow::anyhow!("Feed '{}' has invalid endpoint '{}': {}", feed.name, feed.endpoint, e)
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!(
                    "Feed '{}' endpoint must be http or https, got '{}'",
                    feed.name,
                    url.scheme()
                );
            }

            if let FeedFormat::Json { ip_field } = &feed.format {
                if ip_field.split('.').any(str::is_empty) {
                    anyhow::bail!("Feed '{}' has invalid ip_field '{}'", feed.name, ip_field);
                }
            }
        }

        for entry in &self.allowlist {
            if AllowlistEntry::parse(entry).is_none() {
                anyhow::bail!("Invalid allowlist entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Enabled feeds, in configuration order.
    pub fn enabled_feeds(&self) -> Vec<FeedDescriptor> {
        self.feeds.iter().filter(|f| f.enabled).cloned().collect()
    }

    /// Parse allowlist entries into IpAddr or IpNet.
    pub fn parse_allowlist(&self) -> Vec<AllowlistEntry> {
        self.allowlist
            .iter()
            .filter_map(|s| AllowlistEntry::parse(s))
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IOC Reputation Agent Configuration

settings:
  enabled: true                # false answers "benign" to every lookup
  log_malicious: true
  log_benign: false

# Feed ingestion
ingestion:
  interval_seconds: 900        # Fetch all feeds every 15 minutes
  timeout_ms: 30000            # Per-feed HTTP timeout
  max_body_bytes: 16777216     # Reject feed bodies larger than 16 MiB

# Stale record expiry
pruning:
  interval_seconds: 3600       # Prune once an hour
  max_age_seconds: 86400       # Drop IPs no feed has reported for a day

# Threat intelligence feeds
feeds:
  - name: "log4j-blocklist"
    endpoint: "https://thanksforallthefish.nl/log4j_blocklist.txt"
    format:
      type: plain              # one IP per line

  - name: "json-indicators"
    enabled: false
    endpoint: "https://intel.example.com/v1/indicators?key=${INTEL_API_KEY}"
    format:
      type: json
      ip_field: "indicators.ipv4"  # path to the IP list inside each entry

# IP allowlist - never reported as malicious
# Supports single IPs and CIDR notation
allowlist:
  - "127.0.0.1"
  - "10.0.0.0/8"
"#
        .to_string()
    }
}

/// Parsed allowlist entry.
#[derive(Debug, Clone)]
pub enum AllowlistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl AllowlistEntry {
    /// Parse a single IP or CIDR network.
    ///
    /// Addresses go through the same normalizer as feed entries and lookups,
    /// so any spelling that matches a stored record also matches here.
    pub fn parse(entry: &str) -> Option<Self> {
        if let Some(ip) = normalize(entry) {
            return Some(AllowlistEntry::Single(ip));
        }
        parse_network(entry).map(AllowlistEntry::Network)
    }

    /// Check if an IP address matches this allowlist entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowlistEntry::Single(allowed) => allowed == ip,
            AllowlistEntry::Network(net) => net.contains(ip),
        }
    }
}

fn parse_network(entry: &str) -> Option<IpNet> {
    let (addr, prefix) = entry.trim().split_once('/')?;
    let prefix: u8 = prefix.parse().ok()?;
    let ip = normalize(addr)?;

    match ip {
        // IPv4-mapped network; lookups arrive as plain IPv4.
        IpAddr::V4(v4) if addr.contains(':') => match prefix.checked_sub(96) {
            Some(v4_prefix) => Ipv4Net::new(v4, v4_prefix).ok().map(IpNet::V4),
            None => IpNet::new(IpAddr::V6(v4.to_ipv6_mapped()), prefix).ok(),
        },
        ip => IpNet::new(ip, prefix).ok(),
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };

    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn feed(name: &str, endpoint: &str) -> FeedDescriptor {
        FeedDescriptor {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            format: FeedFormat::Plain,
            enabled: true,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert!(settings.log_malicious);
        assert!(!settings.log_benign);
    }

    #[test]
    fn test_default_schedules() {
        let config = Config::default();
        assert_eq!(config.ingestion.interval(), Duration::from_secs(900));
        assert_eq!(config.ingestion.timeout(), Duration::from_secs(30));
        assert_eq!(config.pruning.interval(), Duration::from_secs(3600));
        assert_eq!(config.pruning.max_age(), Duration::from_secs(86_400));
        assert!(config.ingestion.user_agent.starts_with("zentinel-agent-ioc-reputation/"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_IOC_FEED_KEY", "secret123");
        let input = "endpoint: \"https://x/?key=${TEST_IOC_FEED_KEY}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "endpoint: \"https://x/?key=secret123\"");
        std::env::remove_var("TEST_IOC_FEED_KEY");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let input = "key: \"${NONEXISTENT_IOC_VAR}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "key: \"\"");
    }

    #[test]
    fn test_allowlist_entry_network() {
        let entry = AllowlistEntry::Network("10.0.0.0/8".parse().unwrap());
        assert!(entry.contains(&"10.0.0.1".parse().unwrap()));
        assert!(!entry.contains(&"11.0.0.1".parse().unwrap()));

        let entry = AllowlistEntry::Single("192.168.1.1".parse().unwrap());
        assert!(entry.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!entry.contains(&"192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
ingestion:
  interval_seconds: 60

pruning:
  max_age_seconds: 7200

feeds:
  - name: plain-feed
    endpoint: "https://example.com/list.txt"
  - name: json-feed
    enabled: false
    endpoint: "https://example.com/list.json"
    format:
      type: json
      ip_field: "data.ipv4"
  - name: json-default-field
    endpoint: "https://example.com/other.json"
    format:
      type: json

allowlist:
  - "127.0.0.1"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingestion.interval_seconds, 60);
        assert_eq!(config.ingestion.timeout_ms, 30_000);
        assert_eq!(config.pruning.max_age_seconds, 7200);
        assert_eq!(config.pruning.interval_seconds, 3600);
        assert_eq!(config.feeds.len(), 3);
        assert_eq!(config.feeds[0].format, FeedFormat::Plain);
        assert!(config.feeds[0].enabled);
        assert_eq!(
            config.feeds[1].format,
            FeedFormat::Json {
                ip_field: "data.ipv4".to_string()
            }
        );
        assert_eq!(
            config.feeds[2].format,
            FeedFormat::Json {
                ip_field: "ips".to_string()
            }
        );

        let enabled = config.enabled_feeds();
        assert_eq!(enabled.len(), 2);
        assert!(enabled.iter().all(|f| f.name != "json-feed"));
    }

    #[test]
    fn test_parse_unknown_format_rejected() {
        let yaml = r#"
feeds:
  - name: csv-feed
    endpoint: "https://example.com/list.csv"
    format:
      type: csv
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_validate_duplicate_feed_names() {
        let config = Config {
            feeds: vec![
                feed("dup", "https://a.example.com/"),
                feed("dup", "https://b.example.com/"),
            ],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_endpoint() {
        let config = Config {
            feeds: vec![feed("ftp", "ftp://example.com/list.txt")],
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            feeds: vec![feed("garbage", "not a url")],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.pruning.interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_ip_field_segment() {
        let mut bad = feed("json", "https://example.com/x.json");
        bad.format = FeedFormat::Json {
            ip_field: "data..ips".to_string(),
        };
        let config = Config {
            feeds: vec![bad],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allowlist_invalid() {
        let config = Config {
            allowlist: vec!["not-an-ip".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_allowlist() {
        let config = Config {
            allowlist: vec![
                "127.0.0.1".to_string(),
                "10.0.0.0/8".to_string(),
                "::1".to_string(),
            ],
            ..Config::default()
        };

        let entries = config.parse_allowlist();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_allowlist_spellings_are_normalized() {
        let config = Config {
            allowlist: vec![
                "010.0.0.1".to_string(),
                "::ffff:1.2.3.4".to_string(),
                "::FFFF:192.168.0.0/112".to_string(),
                "2001:DB8::/32".to_string(),
            ],
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        let entries = config.parse_allowlist();
        assert_eq!(entries.len(), 4);
        let allowed = |s: &str| entries.iter().any(|e| e.contains(&s.parse().unwrap()));
        assert!(allowed("10.0.0.1"));
        assert!(allowed("1.2.3.4"));
        assert!(allowed("192.168.7.9"));
        assert!(!allowed("192.169.0.1"));
        assert!(allowed("2001:db8::5"));
    }

    #[test]
    fn test_allowlist_bad_prefix_rejected() {
        for entry in ["10.0.0.0/33", "10.0.0.0/", "::ffff:10.0.0.0/129", "/8"] {
            assert!(AllowlistEntry::parse(entry).is_none(), "{entry}");
        }
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = serde_yaml::from_str(&Config::example()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.enabled_feeds().len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        std::env::set_var("TEST_IOC_LOAD_HOST", "feeds.example.com");
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"feeds:\n  - name: remote\n    endpoint: \"https://${TEST_IOC_LOAD_HOST}/list.txt\"\n",
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.feeds[0].endpoint, "https://feeds.example.com/list.txt");
        std::env::remove_var("TEST_IOC_LOAD_HOST");
    }
}
