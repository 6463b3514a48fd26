//! The single-slot persistent connection cache.

use tracing::{debug, trace};

use super::Connection;
use crate::resolver::{HostResolver, LookupFlags};

#[derive(Debug)]
struct Entry {
    conn: Connection,
    host: String,
    port: u16,
    tls: bool,
    authorized: bool,
}

/// Holds at most one idle keep-alive connection.
///
/// A connection is taken out of the slot while a request uses it and
/// handed back with [`release_for_reuse`](Self::release_for_reuse) once the
/// response has been fully drained.
#[derive(Debug, Default)]
pub struct PersistentSlot {
    entry: Option<Entry>,
}

impl PersistentSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    /// Caches `conn` for `host:port`, closing whatever was cached before.
    pub async fn register(
        &mut self,
        host: &str,
        port: u16,
        tls: bool,
        authorized: bool,
        conn: Connection,
    ) {
        self.invalidate().await;
        debug!(host, port, tls, "caching persistent connection");
        self.entry = Some(Entry {
            conn,
            host: host.to_string(),
            port,
            tls,
            authorized,
        });
    }

    /// Whether the cached connection can carry a request to `host:port`.
    ///
    /// The TLS flag and port must match. The host must match too, except
    /// that a clear-text connection may be shared between virtual hosts
    /// when its peer address is one the target host resolves to. A cached
    /// connection the server has since closed is dropped here.
    pub async fn is_reusable(
        &mut self,
        host: &str,
        port: u16,
        tls: bool,
        resolver: &mut HostResolver,
    ) -> bool {
        let Some(entry) = self.entry.as_mut() else {
            return false;
        };
        if entry.tls != tls || entry.port != port {
            return false;
        }
        if !entry.host.eq_ignore_ascii_case(host) {
            if tls {
                return false;
            }
            let flags = LookupFlags {
                refresh: false,
                silent: true,
            };
            let Ok(addresses) = resolver.lookup(host, flags).await else {
                return false;
            };
            if !addresses.contains(entry.conn.peer_addr().ip()) {
                return false;
            }
            trace!(cached = %entry.host, host, "sharing connection between virtual hosts");
        }
        if !entry.conn.is_idle_alive().await {
            debug!(host = %entry.host, "cached connection was closed by the server");
            self.invalidate().await;
            return false;
        }
        true
    }

    /// Takes the cached connection out of the slot, returning it with its
    /// `authorized` flag.
    pub fn take(&mut self) -> Option<(Connection, bool)> {
        self.entry.take().map(|e| (e.conn, e.authorized))
    }

    /// Closes and forgets the cached connection, if any.
    pub async fn invalidate(&mut self) {
        if let Some(old) = self.entry.take() {
            trace!(host = %old.host, port = old.port, "closing persistent connection");
            old.conn.close().await;
        }
    }

    /// Hands a connection whose response was fully read back to the slot.
    pub async fn release_for_reuse(
        &mut self,
        host: &str,
        port: u16,
        authorized: bool,
        conn: Connection,
    ) {
        let tls = conn.is_tls();
        self.register(host, port, tls, authorized, conn).await;
    }

    /// Closes a connection that must not be reused.
    pub async fn close_and_forget(&mut self, conn: Connection) {
        trace!(peer = %conn.peer_addr(), "closing connection");
        conn.close().await;
    }
}
