//! Upstream proxy validation
//!
//! Confirms the HTTP proxy on the phone is reachable and actually speaks
//! HTTP before any traffic is redirected at it. A dead proxy caught here is
//! a clean Connecting -> Error transition instead of a silently blackholed
//! host.

use crate::recovery::RawFailure;
use crate::resolver::InterfaceInfo;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// Checks that the phone-side proxy is functioning
pub trait ProxyProbe: Send + Sync {
    /// Validate the proxy endpoint described by `iface`.
    ///
    /// Failures come back as classifiable [`RawFailure`]s under the
    /// `validate_proxy` operation name.
    fn check(&self, iface: &InterfaceInfo) -> Result<(), RawFailure>;
}

/// Probe that issues a minimal HTTP request through the proxy.
///
/// Any `HTTP/1.x` status line counts as success: the phone proxy answering
/// at all proves reachability, which is what is being validated here - the
/// response code for the probe URL is the carrier's business.
pub struct HttpProxyProbe {
    connect_timeout: Duration,
    io_timeout: Duration,
    probe_url: String,
}

impl HttpProxyProbe {
    /// Create a probe with the given timeouts
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
            probe_url: "http://connectivitycheck.gstatic.com/generate_204".to_string(),
        }
    }

    /// Override the URL requested through the proxy
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = url.into();
        self
    }

    fn connect(&self, addr: SocketAddr) -> Result<TcpStream, RawFailure> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|e| {
            RawFailure::signal("validate_proxy", format!("socket: {e}"))
        })?;
        socket
            .connect_timeout(&addr.into(), self.connect_timeout)
            .map_err(|e| RawFailure::signal("validate_proxy", format!("connect {addr}: {e}")))?;
        socket.set_nodelay(true).ok();
        socket
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|()| socket.set_write_timeout(Some(self.io_timeout)))
            .map_err(|e| RawFailure::signal("validate_proxy", format!("set timeouts: {e}")))?;
        Ok(socket.into())
    }

    fn host(&self) -> &str {
        self.probe_url
            .strip_prefix("http://")
            .unwrap_or(&self.probe_url)
            .split('/')
            .next()
            .unwrap_or(&self.probe_url)
    }
}

impl Default for HttpProxyProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

impl ProxyProbe for HttpProxyProbe {
    fn check(&self, iface: &InterfaceInfo) -> Result<(), RawFailure> {
        let addr = SocketAddr::new(iface.gateway, iface.proxy_port);
        debug!(proxy = %addr, url = %self.probe_url, "validating upstream proxy");

        let mut stream = self.connect(addr)?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.probe_url,
            self.host()
        );
        stream.write_all(request.as_bytes()).map_err(|e| {
            RawFailure::signal("validate_proxy", format!("send request to {addr}: {e}"))
        })?;

        let mut buf = [0u8; 512];
        let n = stream.read(&mut buf).map_err(|e| {
            RawFailure::signal("validate_proxy", format!("read response from {addr}: {e}"))
        })?;
        if n == 0 {
            return Err(RawFailure::signal(
                "validate_proxy",
                format!("{addr} closed the connection without responding"),
            ));
        }

        let head = String::from_utf8_lossy(&buf[..n]);
        if head.starts_with("HTTP/1.") {
            info!(proxy = %addr, "upstream proxy is responding");
            Ok(())
        } else {
            Err(RawFailure::signal(
                "validate_proxy",
                format!("{addr} sent a non-HTTP response"),
            ))
        }
    }
}
