//! Configuration defaults for the weave control path.

use once_cell::sync::Lazy;

/// Default router image, overridable with `WEAVE_IMAGE`.
pub static WEAVE_IMAGE: Lazy<String> = Lazy::new(|| {
    std::env::var("WEAVE_IMAGE").unwrap_or_else(|_| WeaveConfig::DEFAULT_IMAGE.to_string())
});

/// Default bridge name, overridable with `WEAVE_BRIDGE`.
pub static WEAVE_BRIDGE: Lazy<String> = Lazy::new(|| {
    std::env::var("WEAVE_BRIDGE").unwrap_or_else(|_| WeaveConfig::DEFAULT_BRIDGE.to_string())
});

/// Default MTU, overridable with `WEAVE_MTU`. Unparseable values fall back.
pub static WEAVE_MTU: Lazy<u32> = Lazy::new(|| {
    std::env::var("WEAVE_MTU")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(WeaveConfig::DEFAULT_MTU)
});

/// Settings shared by every weave command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaveConfig {
    /// Bridge device name.
    pub bridge: String,
    /// Interface name given to the container end of each veth pair.
    pub container_ifname: String,
    /// MTU for the bridge and every veth end.
    pub mtu: u32,
    /// Name of the router container.
    pub container_name: String,
    /// Router image reference.
    pub image: String,
    /// Capabilities granted to the router container.
    pub router_caps: Vec<String>,
    /// Host the router's HTTP API listens on.
    pub http_host: String,
    /// Port the router's HTTP API listens on.
    pub http_port: u16,
}

impl WeaveConfig {
    /// Default bridge name.
    pub const DEFAULT_BRIDGE: &'static str = "weave";
    /// Default container-side interface name.
    pub const DEFAULT_CONTAINER_IFNAME: &'static str = "ethwe";
    /// Default MTU; bridges cap it at 65535.
    pub const DEFAULT_MTU: u32 = 65535;
    /// Default router container name.
    pub const DEFAULT_CONTAINER_NAME: &'static str = "weave";
    /// Default router image.
    pub const DEFAULT_IMAGE: &'static str = "zettio/weave";
    /// Default router HTTP port.
    pub const DEFAULT_HTTP_PORT: u16 = 6784;

    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bridge name.
    #[must_use]
    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }

    /// Set the container interface name.
    #[must_use]
    pub fn with_container_ifname(mut self, ifname: impl Into<String>) -> Self {
        self.container_ifname = ifname.into();
        self
    }

    /// Set the MTU.
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the router image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the router container name.
    #[must_use]
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Set the router HTTP API port.
    #[must_use]
    pub const fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// URL of the router's status endpoint.
    #[must_use]
    pub fn status_url(&self) -> String {
        format!("http://{}:{}/status", self.http_host, self.http_port)
    }
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            bridge: WEAVE_BRIDGE.clone(),
            container_ifname: Self::DEFAULT_CONTAINER_IFNAME.to_string(),
            mtu: *WEAVE_MTU,
            container_name: Self::DEFAULT_CONTAINER_NAME.to_string(),
            image: WEAVE_IMAGE.clone(),
            router_caps: vec!["NET_ADMIN".to_string()],
            http_host: "127.0.0.1".to_string(),
            http_port: Self::DEFAULT_HTTP_PORT,
        }
    }
}
