//! The retrieval context.
//!
//! A [`Session`] owns the state that outlives a single request: the
//! address cache, the persistent connection slot, the shared TLS
//! configuration, the URL/file registry and the hosts that accepted Basic
//! credentials. Retrievals run one at a time through `&mut Session`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rustls::ClientConfig;
use tracing::instrument;

use crate::FetchError;
use crate::connect::{ConnectError, PersistentSlot, build_client_config};
use crate::options::Options;
use crate::progress::{NoProgress, ProgressObserver};
use crate::resolver::HostResolver;
use crate::retrieve::{Outcome, Registry, retrieve_url};

/// Connection counters, for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Fresh connections opened.
    pub connects: u64,
    /// Requests sent on a cached persistent connection.
    pub reuses: u64,
}

/// State shared by the retrievals of one run.
pub struct Session {
    pub(crate) options: Options,
    pub(crate) resolver: HostResolver,
    pub(crate) persistent: PersistentSlot,
    pub(crate) registry: Registry,
    pub(crate) stats: SessionStats,
    pub(crate) progress: Arc<dyn ProgressObserver>,
    tls_config: Option<Arc<ClientConfig>>,
    basic_authed_hosts: HashSet<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("persistent", &self.persistent)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(options: Options) -> Self {
        let resolver = HostResolver::new(options.dns_timeout);
        Self {
            options,
            resolver,
            persistent: PersistentSlot::new(),
            registry: Registry::new(),
            stats: SessionStats::default(),
            progress: Arc::new(NoProgress),
            tls_config: None,
            basic_authed_hosts: HashSet::new(),
        }
    }

    /// Reports body progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Retrieves `url`, following redirects.
    ///
    /// # Errors
    ///
    /// See [`retrieve_url`].
    #[instrument(skip(self))]
    pub async fn retrieve(&mut self, url: &str) -> Result<Outcome, FetchError> {
        retrieve_url(self, url).await
    }

    /// Closes the cached persistent connection, if any.
    pub async fn close(&mut self) {
        self.persistent.invalidate().await;
    }

    /// The TLS client configuration, built on first use.
    pub(crate) fn tls_config(&mut self) -> Result<Arc<ClientConfig>, ConnectError> {
        if let Some(config) = &self.tls_config {
            return Ok(Arc::clone(config));
        }
        let config = build_client_config(&self.options.tls)?;
        self.tls_config = Some(Arc::clone(&config));
        Ok(config)
    }

    pub(crate) fn remember_basic_auth(&mut self, host: &str) {
        self.basic_authed_hosts.insert(host.to_ascii_lowercase());
    }

    pub(crate) fn has_basic_auth(&self, host: &str) -> bool {
        self.basic_authed_hosts
            .contains(&host.to_ascii_lowercase())
    }
}
