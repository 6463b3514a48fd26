//! Ordered address lists with per-address failure tracking.

use std::net::IpAddr;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

use super::ResolveError;

/// The resolved addresses of one host name.
///
/// Addresses before the *faulty cursor* failed to connect during the
/// current pass and are skipped. Once every address has been marked the
/// cursor wraps to zero, so a whole-list failure is never permanent.
///
/// Lists are shared through `Arc`; the reference count plays the role of
/// the list's owner count and the list is freed when the last user drops
/// it.
#[derive(Debug)]
pub struct AddressList {
    addresses: Vec<IpAddr>,
    faulty: AtomicUsize,
    connected: AtomicBool,
}

impl AddressList {
    /// Builds a list, dropping duplicates but keeping first-seen order.
    #[must_use]
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut unique: Vec<IpAddr> = Vec::new();
        for ip in addresses {
            if !unique.contains(&ip) {
                unique.push(ip);
            }
        }
        Self {
            addresses: unique,
            faulty: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<IpAddr> {
        self.addresses.get(index).copied()
    }

    /// All addresses, faulty ones included.
    pub fn iter(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses.iter().copied()
    }

    /// Current position of the faulty cursor. Always in `0..len()` for a
    /// non-empty list.
    #[must_use]
    pub fn faulty(&self) -> usize {
        self.faulty.load(Ordering::SeqCst)
    }

    /// Indices worth trying on this pass: `faulty..len`.
    #[must_use]
    pub fn candidates(&self) -> Range<usize> {
        self.faulty()..self.len()
    }

    /// Marks the address at `index` as faulty.
    ///
    /// Addresses must be marked in order, so `index` has to equal the
    /// current cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::FaultyIndexMismatch`] when `index` is not
    /// the cursor position. That is a caller bug; nothing is changed.
    pub fn mark_faulty(&self, index: usize) -> Result<(), ResolveError> {
        let cursor = self.faulty();
        if index != cursor {
            return Err(ResolveError::FaultyIndexMismatch { index, cursor });
        }
        let mut next = cursor + 1;
        if next >= self.len() {
            debug!("every address marked faulty; starting over");
            next = 0;
        }
        self.faulty.store(next, Ordering::SeqCst);
        Ok(())
    }

    /// Whether `ip` is one of this host's addresses.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.addresses.contains(&ip)
    }

    /// Records that some address in the list accepted a connection.
    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Whether any address in the list ever accepted a connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
