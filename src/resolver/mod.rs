//! Host name resolution with a per-host address cache.
//!
//! [`HostResolver::lookup`] turns a host name into a shared
//! [`AddressList`]. Dotted IPv4 literals short-circuit without a DNS query;
//! everything else goes through the system resolver under an optional
//! timeout. Successful lookups are cached until the connection layer asks
//! for a refresh.

mod address_list;
mod error;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

pub use address_list::AddressList;
pub use error::ResolveError;

/// Modifiers for a single [`HostResolver::lookup`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupFlags {
    /// Ignore any cached list and resolve again, replacing the cache entry.
    pub refresh: bool,
    /// Log at debug level only; used for opportunistic lookups such as
    /// persistent-connection matching.
    pub silent: bool,
}

impl LookupFlags {
    /// Plain lookup, cache allowed.
    pub const NONE: Self = Self {
        refresh: false,
        silent: false,
    };
}

/// Resolves host names and caches the results.
#[derive(Debug, Default)]
pub struct HostResolver {
    cache: HashMap<String, Arc<AddressList>>,
    timeout: Option<Duration>,
}

impl HostResolver {
    /// Creates a resolver. `timeout` bounds each DNS query; `None` waits
    /// as long as the system resolver does.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            cache: HashMap::new(),
            timeout,
        }
    }

    /// Resolves `host` into an address list.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Timeout`] when the DNS timeout expires and
    /// [`ResolveError::NotFound`] when the name has no addresses.
    #[instrument(level = "debug", skip(self), fields(host = %host))]
    pub async fn lookup(
        &mut self,
        host: &str,
        flags: LookupFlags,
    ) -> Result<Arc<AddressList>, ResolveError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Arc::new(AddressList::new([IpAddr::V4(ip)])));
        }

        let key = host.to_ascii_lowercase();
        if !flags.refresh
            && let Some(list) = self.cache.get(&key)
        {
            debug!(addresses = list.len(), "using cached address list");
            return Ok(Arc::clone(list));
        }

        if !flags.silent {
            debug!("resolving host");
        }
        let query = tokio::net::lookup_host((host, 0u16));
        let resolved = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, query)
                .await
                .map_err(|_| ResolveError::timeout(host))?,
            None => query.await,
        }
        .map_err(|e| ResolveError::not_found(host, Some(e)))?;

        let list = AddressList::new(resolved.map(|addr| addr.ip()));
        if list.is_empty() {
            return Err(ResolveError::not_found(host, None));
        }
        debug!(
            addresses = ?list.iter().collect::<Vec<_>>(),
            "resolved host"
        );

        let list = Arc::new(list);
        self.cache.insert(key, Arc::clone(&list));
        Ok(list)
    }
}
