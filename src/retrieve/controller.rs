//! The per-URL retry loop.
//!
//! [`http_loop`] drives [`http_attempt`] until the document is retrieved,
//! found unneeded, redirected, or a failure ends the retrieval. It owns
//! the resume offset, the optional HEAD probe used for time-stamping and
//! the wait between attempts.

use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, info, instrument, warn};

use super::outcome::Outcome;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::FetchError;
use crate::http::{AttemptOutcome, AttemptPlan, HttpStat, http_attempt};
use crate::options::Options;
use crate::session::Session;
use crate::url::{AuthMode, Url};

/// What to ask for, fixed across the attempts of one URL.
#[derive(Debug, Clone, Copy)]
pub struct LoopRequest<'a> {
    pub method: &'a str,
    pub body: Option<&'a [u8]>,
    pub referer: Option<&'a str>,
    /// Where the body goes; `None` discards it.
    pub local_file: Option<&'a Path>,
}

/// Size and modification time of an existing local file.
#[derive(Debug, Clone, Copy)]
struct LocalFile {
    size: u64,
    modified: Option<SystemTime>,
}

async fn local_file_state(path: Option<&Path>) -> Option<LocalFile> {
    let metadata = tokio::fs::metadata(path?).await.ok()?;
    metadata.is_file().then(|| LocalFile {
        size: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

/// Retrieves one URL, retrying transient failures.
///
/// A redirect is returned as [`Outcome::NewLocation`] without being
/// followed.
///
/// # Errors
///
/// The failure that ended the loop: a fatal one, or the last transient one
/// once the attempts are used up.
#[instrument(skip_all, fields(url = %url))]
pub async fn http_loop(
    session: &mut Session,
    url: &Url,
    request: &LoopRequest<'_>,
) -> Result<Outcome, FetchError> {
    let options = session.options.clone();
    let policy = RetryPolicy::from_tries(options.tries, options.retry_wait, options.retry_jitter);
    let local = local_file_state(request.local_file).await;

    let mut head_probe = options.spider
        || (options.timestamping && !options.if_modified_since && local.is_some());
    let if_modified_since = if options.timestamping && options.if_modified_since {
        local.and_then(|file| file.modified)
    } else {
        None
    };

    let mut stat = HttpStat::default();
    let mut send_auth = false;
    let mut force_full = false;
    let mut count: u32 = 0;

    loop {
        count += 1;
        stat.restval = if head_probe {
            0
        } else {
            resume_offset(&options, request.local_file, force_full, count, stat.len).await
        };
        let plan = AttemptPlan {
            method: if head_probe { "HEAD" } else { request.method },
            body: if head_probe { None } else { request.body },
            head_only: head_probe,
            if_modified_since: if head_probe { None } else { if_modified_since },
            referer: request.referer,
            output: if head_probe { None } else { request.local_file },
            send_auth,
        };
        debug!(attempt = count, restval = stat.restval, method = plan.method, "attempt");

        let err = match http_attempt(session, url, &mut stat, &plan).await {
            Ok(AttemptOutcome::AuthRetry) => {
                send_auth = true;
                count -= 1;
                continue;
            }
            Ok(AttemptOutcome::NewLocation {
                location,
                keep_method,
            }) => {
                return Ok(Outcome::NewLocation {
                    location,
                    keep_method,
                });
            }
            Ok(AttemptOutcome::Unneeded) => {
                let local_file = request.local_file.map(Path::to_path_buf);
                if let Some(path) = &local_file
                    && tokio::fs::try_exists(path).await.unwrap_or(false)
                {
                    session
                        .registry
                        .register_download(&url.to_string_with(AuthMode::Show), path);
                }
                return Ok(Outcome::Unneeded { local_file });
            }
            Ok(AttemptOutcome::Retrieved) if head_probe => {
                let status = stat.status.unwrap_or_default();
                if options.spider {
                    info!(status, "remote file exists");
                    return Ok(Outcome::RemoteExists { status });
                }
                if let Some(local) = local
                    && !remote_is_newer(&stat, local)
                {
                    info!("server file no newer than local file, not retrieving");
                    return Ok(Outcome::Unneeded {
                        local_file: request.local_file.map(Path::to_path_buf),
                    });
                }
                debug!("remote file is newer, switching to GET");
                head_probe = false;
                count = 0;
                stat = HttpStat::default();
                continue;
            }
            Ok(AttemptOutcome::Retrieved) => {
                return finish_download(session, url, &options, &stat).await;
            }
            Err(err) => err,
        };

        stat.error = Some(err.to_string());
        if matches!(err, FetchError::RangeMismatch { .. }) {
            force_full = true;
        }
        match policy.should_retry(classify_error(&err), count) {
            RetryDecision::Retry { delay, attempt } => {
                warn!(error = %err, next_attempt = attempt, delay_ms = delay.as_millis(), "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(error = %err, %reason, "giving up");
                return Err(err);
            }
        }
    }
}

/// Where the next attempt starts, in priority order: a forced full
/// re-fetch, the configured start position, the local file's size when
/// continuing, what earlier attempts already saved.
async fn resume_offset(
    options: &Options,
    local_file: Option<&Path>,
    force_full: bool,
    count: u32,
    received: u64,
) -> u64 {
    if force_full || local_file.is_none() {
        return 0;
    }
    if let Some(start) = options.start_pos {
        return start;
    }
    if options.continue_download
        && let Some(local) = local_file_state(local_file).await
        && local.size > 0
    {
        return local.size;
    }
    if count > 1 { received } else { 0 }
}

/// Whether the HEAD probe shows a copy worth fetching.
fn remote_is_newer(stat: &HttpStat, local: LocalFile) -> bool {
    let Some(remote) = stat.last_modified() else {
        warn!("no usable Last-Modified header, retrieving");
        return true;
    };
    let Some(modified) = local.modified else {
        return true;
    };
    if remote > modified {
        return true;
    }
    match stat.contlen {
        Some(size) if size != local.size => {
            info!(remote = size, local = local.size, "sizes differ, retrieving");
            true
        }
        _ => false,
    }
}

/// Post-download bookkeeping: timestamp, registry, delete-after.
async fn finish_download(
    session: &mut Session,
    url: &Url,
    options: &Options,
    stat: &HttpStat,
) -> Result<Outcome, FetchError> {
    let status = stat.status.unwrap_or_default();
    let mut local_file = stat.local_file.clone();
    info!(
        len = stat.len,
        received = stat.rd_size,
        elapsed_ms = stat.elapsed.as_millis(),
        file = ?local_file,
        "retrieved"
    );

    if let Some(path) = local_file.clone() {
        if options.timestamping
            && let Some(remote) = stat.last_modified()
        {
            set_mtime(&path, remote).await;
        }
        if options.delete_after {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| FetchError::Unlink {
                    path: path.clone(),
                    source,
                })?;
            info!(file = %path.display(), "removed after download");
            session.registry.register_delete(&path);
            local_file = None;
        } else {
            session
                .registry
                .register_download(&url.to_string_with(AuthMode::Show), &path);
        }
    }

    Ok(Outcome::Retrieved {
        local_file,
        len: stat.len,
        received: stat.rd_size,
        elapsed: stat.elapsed,
        status,
    })
}

/// Sets the file's modification time; failure only costs accuracy of the
/// next time-stamping check.
async fn set_mtime(path: &Path, time: SystemTime) {
    let file = match tokio::fs::OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.into_std().await,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "cannot open file to set its time");
            return;
        }
    };
    if let Err(e) = file.set_modified(time) {
        warn!(file = %path.display(), error = %e, "cannot set file time");
    }
}
