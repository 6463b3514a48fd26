//! One HTTP request/response exchange.
//!
//! [`http_attempt`] builds and sends a request, reads the response head
//! (skipping informational responses), classifies the status and, when
//! there is a document to keep, streams the body. What happens next
//! (retrying, following a redirect, giving up) is the retrieval
//! controller's decision; this module only reports what it saw.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, instrument, warn};

use super::auth::{AuthScheme, basic_authorization, select_scheme};
use super::body::{BodyContext, BodySink, Framing, read_body, skip_short_body};
use super::content_range::{ContentRange, parse_content_range};
use super::request::Request;
use super::response::Response;
use super::stat::{ContentEncoding, HttpStat};
use crate::FetchError;
use crate::connect::{ConnectError, Connection, establish};
use crate::options::Options;
use crate::session::Session;
use crate::url::Url;

/// Content type used for request bodies.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// How to send one request.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPlan<'a> {
    pub method: &'a str,
    pub body: Option<&'a [u8]>,
    /// Read only the head; the method is expected to be HEAD.
    pub head_only: bool,
    /// Send `If-Modified-Since` with this time.
    pub if_modified_since: Option<SystemTime>,
    pub referer: Option<&'a str>,
    /// Where to write the body; `None` discards it.
    pub output: Option<&'a Path>,
    /// Attach Basic credentials because the server asked for them.
    pub send_auth: bool,
}

/// What an attempt ended with, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The response was read in full (body saved, or head only).
    Retrieved,
    /// Nothing to transfer: not modified, or already complete locally.
    Unneeded,
    /// The server redirected. `location` is the raw header value.
    NewLocation { location: String, keep_method: bool },
    /// The server asked for Basic credentials; send the same request again
    /// with them attached.
    AuthRetry,
}

/// Performs one request for `url`, recording what was learned in `stat`.
///
/// `stat.restval` is the resume offset; when it is non-zero a `Range`
/// request is sent and the output file is appended to.
///
/// # Errors
///
/// Every [`FetchError`] the exchange can produce; transient ones leave
/// `stat.len` at the number of bytes safely on disk.
#[instrument(level = "debug", skip_all, fields(url = %url, method = plan.method))]
pub async fn http_attempt(
    session: &mut Session,
    url: &Url,
    stat: &mut HttpStat,
    plan: &AttemptPlan<'_>,
) -> Result<AttemptOutcome, FetchError> {
    stat.reset_response();
    let options = session.options.clone();
    let url_text = url.to_string();
    let host = url.host();
    let port = url.port();

    let credentials = credentials(url, &options);
    let send_basic = credentials.is_some()
        && (plan.send_auth || options.auth_without_challenge || session.has_basic_auth(host));
    let authorization = credentials
        .as_ref()
        .filter(|_| send_basic)
        .map(|(user, password)| basic_authorization(user, password));

    let request = build_request(url, &options, plan, stat.restval, authorization);
    debug!(method = request.method(), target = request.target(), "sending request");

    let (mut conn, authorized) = open_connection(session, url, &options).await?;

    let mut wire = request.to_bytes();
    if let Some(body) = plan.body {
        wire.extend_from_slice(body);
    }
    if let Err(source) = conn.write_all(&wire).await {
        session.persistent.close_and_forget(conn).await;
        return Err(FetchError::Write {
            url: url_text,
            source,
        });
    }

    let response = loop {
        let head = match conn.read_head().await {
            Ok(head) => head,
            Err(ConnectError::Closed) => {
                session.persistent.close_and_forget(conn).await;
                return Err(FetchError::NoData { url: url_text });
            }
            Err(e) => {
                session.persistent.close_and_forget(conn).await;
                return Err(FetchError::read(url_text, stat.len, e));
            }
        };
        let response = Response::parse(&head);
        for line in response.lines() {
            debug!(header = line, "response");
        }
        match response.status() {
            Some(status) if (100..200).contains(&status.code) && !response.is_http09() => {
                debug!(code = status.code, "informational response, reading the next one");
            }
            Some(_) => break response,
            None => {
                let line = response.lines().next().unwrap_or_default().to_string();
                session.persistent.close_and_forget(conn).await;
                return Err(FetchError::MalformedStatusLine {
                    url: url_text,
                    line,
                });
            }
        }
    };
    let Some(status) = response.status() else {
        return Err(FetchError::internal("status line vanished after parsing"));
    };
    let code = status.code;
    info!(code, reason = %status.reason, "HTTP response");
    stat.status = Some(code);
    stat.reason = Some(status.reason.clone());

    let content_length = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    stat.chunked = response
        .header("Transfer-Encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    stat.encoding = response
        .header("Content-Encoding")
        .map(ContentEncoding::parse)
        .unwrap_or_default();
    stat.content_type = response.header("Content-Type").map(str::to_string);
    stat.location = response.header("Location").map(str::to_string);
    stat.remote_time = response.header("Last-Modified").map(str::to_string);

    let content_range = response.header("Content-Range").and_then(parse_content_range);
    if let Some(ContentRange::Bytes { first, .. }) = content_range {
        stat.contrange = first;
    }
    stat.contlen = if stat.chunked {
        None
    } else {
        match content_range {
            Some(range @ ContentRange::Bytes { .. }) => Some(range.len()),
            _ => content_length,
        }
    };

    let no_body = plan.head_only || code == 204 || code == 304;
    let framing = if no_body {
        Framing::Empty
    } else if response.is_http09() {
        Framing::UntilClose
    } else if stat.chunked {
        Framing::Chunked
    } else if let Some(length) = content_length.or(stat.contlen) {
        Framing::Length(length)
    } else {
        Framing::UntilClose
    };

    let keep_alive = options.keep_alive
        && !response.is_http09()
        && framing != Framing::UntilClose
        && !response.header_has_token("Connection", "close")
        && (response.header("Keep-Alive").is_some()
            || response.header_has_token("Connection", "keep-alive")
            || status.is_http11());
    let disposition = Disposition {
        keep_alive,
        authorized: authorized || (send_basic && code != 401),
        host: host.to_string(),
        port,
    };

    if code == 401 {
        disposition.discard_body(session, conn, framing).await;
        if credentials.is_none() {
            return Err(FetchError::auth_failed(url_text, "no credentials available"));
        }
        if send_basic {
            return Err(FetchError::auth_failed(url_text, "credentials rejected"));
        }
        let challenges = response.header_all("WWW-Authenticate");
        return match select_scheme(challenges.iter().copied()) {
            Some(AuthScheme::Basic) => {
                debug!("server wants Basic credentials");
                Ok(AttemptOutcome::AuthRetry)
            }
            Some(scheme) => Err(FetchError::auth_failed(
                url_text,
                format!("unsupported authentication scheme {}", scheme.as_str()),
            )),
            None => Err(FetchError::auth_failed(
                url_text,
                "unknown authentication scheme",
            )),
        };
    }
    if send_basic {
        session.remember_basic_auth(host);
    }

    if matches!(code, 300..=303 | 307 | 308) {
        if let Some(location) = stat.location.clone() {
            disposition.discard_body(session, conn, framing).await;
            let keep_method = match code {
                303 | 307 | 308 => true,
                301 | 302 => options
                    .method
                    .as_deref()
                    .is_some_and(|method| !method.eq_ignore_ascii_case("POST")),
                _ => false,
            };
            info!(%location, code, "redirected");
            return Ok(AttemptOutcome::NewLocation {
                location,
                keep_method,
            });
        }
        if code != 300 {
            disposition.discard_body(session, conn, framing).await;
            return Err(FetchError::RedirectWithoutLocation {
                url: url_text,
                status: code,
            });
        }
    }

    if code == 304 {
        disposition.discard_body(session, conn, framing).await;
        if plan.if_modified_since.is_some() {
            info!("remote file not modified");
            return Ok(AttemptOutcome::Unneeded);
        }
        return Err(FetchError::http_status(url_text, code, status.reason, false));
    }

    if code == 416 {
        disposition.discard_body(session, conn, framing).await;
        let total = content_range.and_then(|range| range.total()).or_else(|| {
            content_length.and_then(|length| length.checked_add(stat.contrange))
        });
        return match total {
            Some(total) if stat.restval < total => Err(FetchError::RangeNotSatisfiable {
                url: url_text,
                restval: stat.restval,
                total,
            }),
            _ => {
                info!("the file is already fully retrieved");
                stat.len = stat.restval;
                Ok(AttemptOutcome::Unneeded)
            }
        };
    }

    if !(200..300).contains(&code) && code != 300 {
        disposition.discard_body(session, conn, framing).await;
        if code == 504 {
            return Err(FetchError::GatewayTimeout { url: url_text });
        }
        let retryable = options.retry_on_http_error.contains(&code);
        return Err(FetchError::http_status(url_text, code, status.reason, retryable));
    }

    if code == 200
        && stat.restval > 0
        && !options.timestamping
        && stat.contrange == 0
        && stat.contlen.is_some_and(|length| stat.restval >= length)
    {
        disposition.discard_body(session, conn, framing).await;
        info!("the file is already fully retrieved");
        stat.len = stat.restval;
        return Ok(AttemptOutcome::Unneeded);
    }

    if code == 206 && (content_range.is_none() || stat.contrange != stat.restval) {
        warn!(requested = stat.restval, offered = stat.contrange, "unexpected range");
        session.persistent.close_and_forget(conn).await;
        return Err(FetchError::RangeMismatch {
            url: url_text,
            requested: stat.restval,
            offered: stat.contrange,
        });
    }

    if stat.restval > 0 && code != 206 && !plan.head_only {
        if options.continue_download {
            session.persistent.close_and_forget(conn).await;
            return Err(FetchError::ContinueNotSupported { url: url_text });
        }
        info!("server ignored the range request, starting over");
        stat.restval = 0;
    }
    stat.len = stat.restval;

    if plan.head_only {
        disposition.finish(session, conn).await;
        return Ok(AttemptOutcome::Retrieved);
    }

    let mut sink = match plan.output {
        Some(path) => match BodySink::open(path, stat.restval > 0).await {
            Ok(sink) => sink,
            Err(e) => {
                session.persistent.close_and_forget(conn).await;
                return Err(e);
            }
        },
        None => BodySink::Discard,
    };
    stat.local_file = plan.output.map(Path::to_path_buf);

    let progress = Arc::clone(&session.progress);
    let ctx = BodyContext {
        url: &url_text,
        limit_rate: options.limit_rate,
        progress: &progress,
    };
    let result = read_body(&mut conn, &mut sink, framing, &ctx, stat).await;
    drop(sink);

    match result {
        Ok(()) => {
            disposition.finish(session, conn).await;
            Ok(AttemptOutcome::Retrieved)
        }
        Err(e) => {
            session.persistent.close_and_forget(conn).await;
            Err(e)
        }
    }
}

/// What to do with the connection once the response is dealt with.
struct Disposition {
    keep_alive: bool,
    authorized: bool,
    host: String,
    port: u16,
}

impl Disposition {
    /// Body fully read: cache the connection if the server allows it.
    async fn finish(self, session: &mut Session, conn: Connection) {
        if self.keep_alive {
            session
                .persistent
                .release_for_reuse(&self.host, self.port, self.authorized, conn)
                .await;
        } else {
            session.persistent.close_and_forget(conn).await;
        }
    }

    /// Body not wanted: drain it if short, otherwise drop the connection.
    async fn discard_body(mut self, session: &mut Session, mut conn: Connection, framing: Framing) {
        if self.keep_alive && !skip_short_body(&mut conn, framing).await {
            self.keep_alive = false;
        }
        self.finish(session, conn).await;
    }
}

/// User and password from the URL, falling back to the configured ones.
fn credentials(url: &Url, options: &Options) -> Option<(String, String)> {
    let user = url.user().or(options.http_user.as_deref())?;
    let password = url
        .password()
        .or(options.http_password.as_deref())
        .unwrap_or_default();
    Some((user.to_string(), password.to_string()))
}

/// Reuses the cached connection when it fits, otherwise opens a new one.
/// Returns the connection and whether it already carried accepted
/// credentials.
async fn open_connection(
    session: &mut Session,
    url: &Url,
    options: &Options,
) -> Result<(Connection, bool), FetchError> {
    let host = url.host();
    let port = url.port();
    let tls = url.scheme().is_secure();

    if options.keep_alive
        && session
            .persistent
            .is_reusable(host, port, tls, &mut session.resolver)
            .await
        && let Some((conn, authorized)) = session.persistent.take()
    {
        info!(host, port, "reusing persistent connection");
        session.stats.reuses += 1;
        return Ok((conn, authorized));
    }

    let tls_config = if tls {
        Some(
            session
                .tls_config()
                .map_err(|e| FetchError::from_connect(host, e, false))?,
        )
    } else {
        None
    };
    let conn = establish(&mut session.resolver, host, port, tls_config, options)
        .await
        .map_err(|e| FetchError::from_connect(host, e, options.retry_connrefused))?;
    session.stats.connects += 1;
    Ok((conn, false))
}

/// Builds the request head for `url`.
///
/// Header order: Referer, Range, User-Agent, Accept, Accept-Encoding,
/// Authorization, Host, Connection, If-Modified-Since, cache control,
/// configured extras, then body headers.
#[must_use]
pub fn build_request(
    url: &Url,
    options: &Options,
    plan: &AttemptPlan<'_>,
    restval: u64,
    authorization: Option<String>,
) -> Request {
    let mut request = Request::new(plan.method, url.full_path());

    if let Some(referer) = plan.referer {
        request.set_header("Referer", referer);
    }
    if restval > 0 {
        request.set_header("Range", format!("bytes={restval}-"));
    }
    request.set_header("User-Agent", options.user_agent.clone());
    request.set_header("Accept", "*/*");
    request.set_header("Accept-Encoding", "identity");
    if let Some(authorization) = authorization {
        request.set_header("Authorization", authorization);
    }

    let host = if url.port() == url.scheme().default_port() {
        url.host().to_string()
    } else {
        format!("{}:{}", url.host(), url.port())
    };
    request.set_header("Host", host);
    request.set_header(
        "Connection",
        if options.keep_alive { "Keep-Alive" } else { "Close" },
    );

    if let Some(since) = plan.if_modified_since {
        request.set_header("If-Modified-Since", httpdate::fmt_http_date(since));
    }
    if options.no_cache {
        request.set_header("Cache-Control", "no-cache");
        request.set_header("Pragma", "no-cache");
    }
    for (name, value) in &options.extra_headers {
        request.set_header(name.clone(), value.clone());
    }

    if let Some(body) = plan.body {
        if request.header("Content-Type").is_none() {
            request.set_header("Content-Type", FORM_CONTENT_TYPE);
        }
        request.set_header("Content-Length", body.len().to_string());
    }
    request
}

/// Local file name for `url` under `dir`: the URL's file part, or
/// `index.html` for directory URLs.
#[must_use]
pub fn local_file_name(url: &Url, dir: &Path) -> PathBuf {
    let file = crate::url::unescape(url.file());
    let file = file.replace(['/', '\\'], "_");
    if file.is_empty() || file == "." || file == ".." {
        dir.join("index.html")
    } else {
        dir.join(file)
    }
}
