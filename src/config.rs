use crate::error::ServerResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,

    // TLS collaborator inputs; handed to the listener, never parsed here
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,

    // File serving
    pub root_dir: PathBuf,
    pub index_names: Vec<String>,
    pub generate_index_pages: bool,
    pub compress: bool,
    pub accept_byte_range: bool,
    pub vhost: bool,

    // Cache settings
    pub cache_ttl: Duration,
    /// Memory ceiling for cached bodies in bytes. None means no eviction.
    pub cache_max_bytes: Option<usize>,

    // Connection settings
    pub max_conns_per_ip: usize,
    pub max_request_body_size: usize,
    pub max_upload_size: u64,
    pub connection_timeout: Duration,
    pub initial_buffer_size: usize,

    // Thread configuration
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 8080,

            tls_cert_file: None,
            tls_key_file: None,

            root_dir: PathBuf::from("/usr/share/nginx/html"),
            index_names: vec!["index.html".to_string()],
            generate_index_pages: true,
            compress: false,
            accept_byte_range: false,
            vhost: false,

            cache_ttl: Duration::from_secs(10),
            cache_max_bytes: None,

            max_conns_per_ip: 1,
            max_request_body_size: 260 * 1024 * 1024,
            max_upload_size: 2000 * 1024 * 1024, // 2 GB
            connection_timeout: Duration::from_secs(30),
            initial_buffer_size: 16 * 1024, // 16 KB

            worker_threads: num_cpus::get(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the directory to serve files from
    pub fn with_root_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Enable or disable transparent gzip compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Enable or disable byte-range request handling
    pub fn with_byte_range(mut self, enabled: bool) -> Self {
        self.accept_byte_range = enabled;
        self
    }

    /// Enable or disable virtual-host path rewriting
    pub fn with_vhost(mut self, enabled: bool) -> Self {
        self.vhost = enabled;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
