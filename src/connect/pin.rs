//! Public key pinning.
//!
//! A pin is either a list of `sha256//<base64>` digests of the server's
//! SubjectPublicKeyInfo, or a file holding the expected public key in DER
//! or PEM form.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::SubjectPublicKeyInfoDer;
use rustls::pki_types::pem::PemObject;
use sha2::{Digest, Sha256};

use super::ConnectError;

const DIGEST_PREFIX: &str = "sha256//";

/// An expected server public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedKey {
    /// Any of these SHA-256 digests of the SPKI must match.
    Digests(Vec<[u8; 32]>),
    /// The SPKI must equal these DER bytes.
    Der(Vec<u8>),
}

impl PinnedKey {
    /// Parses a pin setting: a `;`-separated `sha256//` list, or a path to
    /// a key file.
    ///
    /// # Errors
    ///
    /// [`ConnectError::TlsInit`] for malformed digests or unreadable files.
    pub fn parse(setting: &str) -> Result<Self, ConnectError> {
        if setting.starts_with(DIGEST_PREFIX) {
            let digests = setting
                .split(';')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(parse_digest)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Digests(digests));
        }

        let bytes = std::fs::read(Path::new(setting)).map_err(|e| {
            ConnectError::tls_init(format!("cannot read pinned public key {setting}: {e}"))
        })?;
        Ok(match SubjectPublicKeyInfoDer::from_pem_slice(&bytes) {
            Ok(spki) => Self::Der(spki.as_ref().to_vec()),
            Err(_) => Self::Der(bytes),
        })
    }

    /// Whether the certificate's public key satisfies this pin.
    #[must_use]
    pub fn matches(&self, cert_der: &[u8]) -> bool {
        let Some(spki) = subject_public_key_info(cert_der) else {
            return false;
        };
        match self {
            Self::Digests(digests) => {
                let actual: [u8; 32] = Sha256::digest(spki).into();
                digests.iter().any(|d| *d == actual)
            }
            Self::Der(expected) => expected.as_slice() == spki,
        }
    }
}

fn parse_digest(item: &str) -> Result<[u8; 32], ConnectError> {
    let encoded = item
        .strip_prefix(DIGEST_PREFIX)
        .ok_or_else(|| ConnectError::tls_init(format!("bad public key pin '{item}'")))?;
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| ConnectError::tls_init(format!("bad public key pin '{item}': {e}")))?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        ConnectError::tls_init(format!(
            "public key pin '{item}' is {} bytes, expected 32",
            raw.len()
        ))
    })
}

/// One DER element: its tag, the whole encoding and the content.
struct Element<'a> {
    tag: u8,
    whole: &'a [u8],
    content: &'a [u8],
}

fn read_element(input: &[u8]) -> Option<(Element<'_>, &[u8])> {
    let tag = *input.first()?;
    let first_len = *input.get(1)?;
    let (len, header) = if first_len & 0x80 == 0 {
        (usize::from(first_len), 2)
    } else {
        let count = usize::from(first_len & 0x7f);
        if count == 0 || count > 4 {
            return None;
        }
        let bytes = input.get(2..2 + count)?;
        let len = bytes
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        (len, 2 + count)
    };
    let end = header.checked_add(len)?;
    let whole = input.get(..end)?;
    Some((
        Element {
            tag,
            whole,
            content: &whole[header..],
        },
        &input[end..],
    ))
}

/// Extracts the SubjectPublicKeyInfo from an X.509 certificate.
fn subject_public_key_info(cert: &[u8]) -> Option<&[u8]> {
    const SEQUENCE: u8 = 0x30;
    const VERSION: u8 = 0xa0;

    let (certificate, _) = read_element(cert)?;
    if certificate.tag != SEQUENCE {
        return None;
    }
    let (tbs, _) = read_element(certificate.content)?;
    if tbs.tag != SEQUENCE {
        return None;
    }

    let mut rest = tbs.content;
    let (first, after) = read_element(rest)?;
    if first.tag == VERSION {
        rest = after;
    }
    // serialNumber, signature, issuer, validity, subject
    for _ in 0..5 {
        let (_, after) = read_element(rest)?;
        rest = after;
    }
    let (spki, _) = read_element(rest)?;
    (spki.tag == SEQUENCE).then_some(spki.whole)
}
