//! Connection manager: opening TCP/TLS connections and caching one
//! keep-alive connection.
//!
//! [`connect_to_host`] walks a host's address list, skipping addresses
//! that already failed, and re-resolves once when a list that used to work
//! stops working. [`establish`] adds the TLS layer for secure schemes and
//! wraps the result in a [`Connection`].

mod connection;
mod error;
mod persistent;
mod pin;
mod tls;
mod transport;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rustls::ClientConfig;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, instrument, warn};

pub use connection::{Connection, MAX_HEAD_SIZE};
pub use error::ConnectError;
pub use persistent::PersistentSlot;
pub use pin::PinnedKey;
pub use tls::{TlsTransport, build_client_config, handshake};
pub use transport::{PlainTransport, Transport};

use crate::options::Options;
use crate::resolver::{HostResolver, LookupFlags};

/// Below this rate limit the socket receive buffer is shrunk so the kernel
/// does not read far ahead of the throttled consumer.
const SMALL_RCVBUF_RATE: u64 = 8 * 1024;

/// Smallest receive buffer requested.
const MIN_RCVBUF: u64 = 512;

/// Opens a TCP connection to one address.
///
/// # Errors
///
/// [`ConnectError::Bind`], [`ConnectError::Connect`] or
/// [`ConnectError::ConnectTimeout`]. The socket is closed on failure.
#[instrument(level = "debug", skip(options))]
pub async fn connect_to_ip(
    ip: IpAddr,
    port: u16,
    options: &Options,
) -> Result<TcpStream, ConnectError> {
    let addr = SocketAddr::new(ip, port);
    let socket = match ip {
        IpAddr::V4(_) => TcpSocket::new_v4(),
        IpAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|e| ConnectError::connect(addr, e))?;

    if let Some(rate) = options.limit_rate
        && rate < SMALL_RCVBUF_RATE
    {
        let size = u32::try_from(rate.max(MIN_RCVBUF)).unwrap_or(u32::MAX);
        if let Err(e) = socket.set_recv_buffer_size(size) {
            debug!(error = %e, "could not shrink receive buffer");
        }
    }

    if let Some(bind) = options.bind_address {
        let local = SocketAddr::new(bind, 0);
        socket
            .bind(local)
            .map_err(|source| ConnectError::Bind {
                addr: local,
                source,
            })?;
    }

    let connect = socket.connect(addr);
    let stream = match options.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| ConnectError::ConnectTimeout { addr })?,
        None => connect.await,
    }
    .map_err(|e| ConnectError::connect(addr, e))?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not set TCP_NODELAY");
    }
    Ok(stream)
}

/// Resolves `host` and connects to the first address that accepts.
///
/// Addresses are tried from the list's faulty cursor onwards; each failure
/// advances the cursor. If every candidate fails on a list that connected
/// before, the DNS answer is assumed stale and the host is resolved and
/// scanned once more.
///
/// # Errors
///
/// Resolution errors, or the error from the last address tried.
#[instrument(level = "debug", skip(resolver, options))]
pub async fn connect_to_host(
    resolver: &mut HostResolver,
    host: &str,
    port: u16,
    options: &Options,
) -> Result<TcpStream, ConnectError> {
    let mut flags = LookupFlags::NONE;
    let mut refreshed = false;

    loop {
        let addresses = resolver.lookup(host, flags).await?;
        let mut last_error = None;

        for index in addresses.candidates() {
            let Some(ip) = addresses.get(index) else {
                break;
            };
            info!(host, %ip, port, "connecting");
            match connect_to_ip(ip, port, options).await {
                Ok(stream) => {
                    addresses.set_connected();
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(%ip, port, error = %e, "connect failed");
                    addresses.mark_faulty(index)?;
                    last_error = Some(e);
                }
            }
        }

        if addresses.is_connected() && !refreshed {
            debug!(host, "address list worked before, resolving again");
            flags.refresh = true;
            refreshed = true;
            continue;
        }

        return Err(last_error.unwrap_or_else(|| {
            ConnectError::Resolve(crate::resolver::ResolveError::not_found(host, None))
        }));
    }
}

/// Opens a fresh connection to `host:port`, wrapping it in TLS when a
/// client configuration is given.
///
/// # Errors
///
/// Anything [`connect_to_host`] or [`handshake`] can return.
pub async fn establish(
    resolver: &mut HostResolver,
    host: &str,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
    options: &Options,
) -> Result<Connection, ConnectError> {
    let stream = connect_to_host(resolver, host, port, options).await?;
    let peer = stream.peer_addr().map_err(ConnectError::read)?;
    let read_timeout = options.read_timeout;

    Ok(match tls {
        Some(config) => {
            let transport = handshake(config, host, stream, read_timeout).await?;
            Connection::new(Box::new(transport), peer, true, read_timeout)
        }
        None => Connection::new(
            Box::new(PlainTransport::new(stream)),
            peer,
            false,
            read_timeout,
        ),
    })
}
