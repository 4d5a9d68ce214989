//! HTTP request description: everything one transfer attempt needs, from
//! the composed URL down to proxy and TLS material.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::utils::{to_query_string, Headers, QueryParams};

/// Proxy flavors understood by the transfer engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyType {
    /// HTTP proxy.
    Http,
    /// HTTPS proxy.
    Https,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS4A proxy.
    Socks4a,
    /// SOCKS5 proxy.
    Socks5,
    /// SOCKS5 proxy with hostname resolution on the proxy side.
    Socks5Hostname,
}

impl ProxyType {
    /// URL scheme prefix used when handing the proxy to the HTTP engine.
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http | ProxyType::Https => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks4a => "socks4a",
            ProxyType::Socks5 => "socks5",
            ProxyType::Socks5Hostname => "socks5h",
        }
    }
}

/// A single HTTP request, immutable once submitted to the manager.
///
/// Construct one, adjust the knobs you care about, and hand it to
/// [`Library::http_request`](crate::runtime::Library::http_request) (or let
/// the free-function façade build it for you).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Unique identifier assigned by the manager (0 until submitted).
    pub request_id: u64,
    /// HTTP request headers.
    pub headers: Headers,
    /// Full request URL, query string included.
    pub url: String,
    /// HTTP request method (e.g. "GET", "POST").
    pub method: String,
    /// Data payload for the request.
    pub content: Vec<u8>,
    /// User-Agent header, applied only when `headers` does not set one.
    pub user_agent: String,
    /// Accept-Encoding header, applied only when `headers` does not set one.
    pub accept_encoding: String,
    /// Cookie data as a single header string.
    pub cookie: String,
    /// Path to the client certificate file (PEM).
    pub cert_file: String,
    /// Path to the private key for the client certificate (PKCS#8 PEM).
    pub key_file: String,
    /// Path to the CA certificate file (PEM).
    pub ca_file: String,
    /// Path to a directory containing CA certificates.
    pub ca_path: String,
    /// Proxy address in `ip:port` format.
    pub proxy_server: String,
    /// Proxy authentication in `username:password` format.
    pub proxy_auth: String,
    /// Proxy type.
    pub proxy_type: ProxyType,
    /// Tunnel through the proxy with CONNECT. Plain-HTTP targets are
    /// otherwise forwarded absolute-URI style; TLS targets always tunnel.
    pub proxy_tunnel: bool,
    /// Network interface name to bind the outgoing connection to.
    pub interface_name: String,
    /// Enable binding to `interface_name`.
    pub use_interface: bool,

    /// Automatically follow HTTP redirects.
    pub follow_location: bool,
    /// Maximum allowed redirects.
    pub max_redirects: u32,
    /// Automatically set the Referer header while following redirects.
    pub auto_referer: bool,

    /// Overall request timeout in seconds (0 disables the deadline).
    pub timeout: u64,
    /// Connection timeout in seconds (0 disables the deadline).
    pub connect_timeout: u64,
    /// General rate-limit id (0 means unconstrained).
    pub general_rate_limit_id: u64,
    /// Specific rate-limit id (0 means unconstrained).
    pub specific_rate_limit_id: u64,
    /// Status codes that terminate the retry loop.
    pub valid_statuses: HashSet<u16>,
    /// Number of retry attempts on non-valid statuses (0 disables retries).
    pub retry_attempts: u32,
    /// Delay between retry attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Request only the response head.
    pub head_only: bool,

    /// Enable verbose connection diagnostics in the transfer engine.
    pub verbose: bool,
    /// Log response headers at debug level when the transfer completes.
    pub debug_header: bool,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            request_id: 0,
            headers: Headers::new(),
            url: String::new(),
            method: "GET".to_string(),
            content: Vec::new(),
            user_agent: String::new(),
            accept_encoding: String::new(),
            cookie: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            ca_file: String::new(),
            ca_path: String::new(),
            proxy_server: String::new(),
            proxy_auth: String::new(),
            proxy_type: ProxyType::Http,
            proxy_tunnel: true,
            interface_name: String::new(),
            use_interface: false,
            follow_location: true,
            max_redirects: 10,
            auto_referer: false,
            timeout: 30,
            connect_timeout: 10,
            general_rate_limit_id: 0,
            specific_rate_limit_id: 0,
            valid_statuses: HashSet::from([200]),
            retry_attempts: 0,
            retry_delay_ms: 0,
            head_only: false,
            verbose: false,
            debug_header: false,
        }
    }
}

impl HttpRequest {
    /// Sets the request URL from host, path and an optional raw query
    /// string. A missing leading `/` on the path and a missing `?` on the
    /// query are supplied.
    pub fn set_url(&mut self, host: &str, path: &str, query: &str) {
        let mut url = host.to_string();
        if !path.is_empty() && !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if !query.is_empty() {
            if !query.starts_with('?') {
                url.push('?');
            }
            url.push_str(query);
        }
        self.url = url;
    }

    /// Sets the request URL from host, path and a query-parameter list.
    pub fn set_url_with_params(&mut self, host: &str, path: &str, query: &QueryParams) {
        let query_str = to_query_string(query, "");
        self.set_url(host, path, &query_str);
    }

    /// Sets a full URL and appends query parameters to it.
    pub fn set_full_url(&mut self, url: &str, query: &QueryParams) {
        self.url = format!("{url}{}", to_query_string(query, "?"));
    }

    /// Builds the Accept-Encoding header value from the enabled codings.
    pub fn set_accept_encoding(&mut self, identity: bool, deflate: bool, gzip: bool, brotli: bool) {
        let mut encodings: Vec<&str> = Vec::new();
        if identity {
            encodings.push("identity");
        }
        if deflate {
            encodings.push("deflate");
        }
        if gzip {
            encodings.push("gzip");
        }
        if brotli {
            encodings.push("br");
        }
        self.accept_encoding = encodings.join(",");
    }

    /// Sets the proxy server address from separate host and port.
    pub fn set_proxy(&mut self, ip: &str, port: u16) {
        self.proxy_server = format!("{ip}:{port}");
    }

    /// Sets proxy credentials.
    pub fn set_proxy_auth(&mut self, user: &str, password: &str) {
        self.proxy_auth = format!("{user}:{password}");
    }
}
