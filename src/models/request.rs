use std::net::IpAddr;

/// Per-request context assembled by the gateway's pre-handler stage and
/// consumed by the post-handler recorder. Nothing downstream re-derives the
/// client address; this struct is the single place it lives.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client address resolved through the trusted-proxy header chain.
    pub address: IpAddr,

    /// Whether the address came from a routable (public) source.
    pub routable: bool,

    pub method: String,

    pub path: String,

    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(address: IpAddr, routable: bool, method: String, path: String) -> Self {
        Self {
            address,
            routable,
            method,
            path,
            user_agent: None,
        }
    }
}
