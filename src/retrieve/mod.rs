//! Retrieval controller.
//!
//! [`retrieve_url`] is the entry point: it parses the URL, picks the local
//! file, runs the per-URL retry loop and follows redirects.

mod controller;
mod outcome;
mod registry;
mod retry;

use std::path::PathBuf;

use tracing::{info, instrument};

pub use controller::{LoopRequest, http_loop};
pub use outcome::{ExitStatus, Outcome};
pub use registry::Registry;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};

use crate::FetchError;
use crate::http::local_file_name;
use crate::options::Options;
use crate::session::Session;
use crate::url::{AuthMode, Url};

/// Retrieves `url`, following up to `max_redirect` redirects.
///
/// With `max_redirect` set to 0 the first redirect is returned as
/// [`Outcome::NewLocation`].
///
/// # Errors
///
/// [`FetchError::InvalidUrl`] / [`FetchError::UnsupportedScheme`] for the
/// URL or a redirect target, [`FetchError::TooManyRedirects`], and any
/// failure of [`http_loop`].
#[instrument(level = "debug", skip(session))]
pub async fn retrieve_url(session: &mut Session, url: &str) -> Result<Outcome, FetchError> {
    let mut current = Url::parse(url).map_err(|e| FetchError::invalid_url(url, e))?;
    ensure_http(&current)?;

    let options = session.options.clone();
    let local_file = local_target(&options, &current);
    let mut method = options.request_method().to_string();
    let mut body = options.body_data.clone();
    let mut hops: Vec<(String, String)> = Vec::new();

    loop {
        let request = LoopRequest {
            method: &method,
            body: body.as_deref(),
            referer: options.referer.as_deref(),
            local_file: local_file.as_deref(),
        };
        let outcome = http_loop(session, &current, &request).await?;
        let Outcome::NewLocation {
            location,
            keep_method,
        } = outcome
        else {
            for (from, to) in hops.iter().rev() {
                session.registry.register_redirection(from, to);
            }
            return Ok(outcome);
        };

        if options.max_redirect == 0 {
            return Ok(Outcome::NewLocation {
                location,
                keep_method,
            });
        }
        if hops.len() >= options.max_redirect as usize {
            return Err(FetchError::TooManyRedirects {
                url: current.to_string(),
                limit: options.max_redirect,
            });
        }

        let next = current
            .join(&location)
            .map_err(|e| FetchError::invalid_url(location.as_str(), e))?;
        ensure_http(&next)?;
        info!(from = %current, to = %next, "following redirect");
        if !keep_method {
            method = "GET".to_string();
            body = None;
        }
        hops.push((
            current.to_string_with(AuthMode::Show),
            next.to_string_with(AuthMode::Show),
        ));
        current = next;
    }
}

fn ensure_http(url: &Url) -> Result<(), FetchError> {
    if url.scheme().is_http() {
        Ok(())
    } else {
        Err(FetchError::UnsupportedScheme {
            url: url.to_string(),
        })
    }
}

/// The file the document is saved to, decided once from the requested URL.
fn local_target(options: &Options, url: &Url) -> Option<PathBuf> {
    if options.spider {
        return None;
    }
    if let Some(output) = &options.output_document {
        return Some(output.clone());
    }
    Some(local_file_name(url, &options.directory_prefix))
}
