//! An async driver binding the byte-driven engine to a tokio transport and
//! running matched requests through the router.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use http::{Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{Reason, StreamId};
use crate::proto::{Config, Connection, Event, ResponseUnit};
use crate::request::RequestCtx;
use crate::route::Host;
use crate::Error;

/// The cookie carrying the session id.
const SESSION_COOKIE: &str = "TSESSIONID";

/// Builds server connections with custom configuration values.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Sets the initial window size for stream-level flow control.
    pub fn initial_window_size(&mut self, size: u32) -> &mut Self {
        self.config.initial_window_size = size;
        self
    }

    /// Sets the target level for the connection receive window.
    pub fn initial_connection_window_size(&mut self, size: u32) -> &mut Self {
        self.config.initial_connection_window_size = size;
        self
    }

    /// Sets the max frame size to advertise.
    pub fn max_frame_size(&mut self, size: u32) -> &mut Self {
        self.config.max_frame_size = size;
        self
    }

    /// Sets the maximum number of concurrent streams.
    pub fn max_concurrent_streams(&mut self, max: u32) -> &mut Self {
        self.config.max_concurrent_streams = Some(max);
        self
    }

    /// Sets the maximum decoded size of a header block.
    pub fn max_header_list_size(&mut self, max: usize) -> &mut Self {
        self.config.max_header_list_size = max;
        self
    }

    /// Create the engine half only; for embedders driving bytes themselves.
    pub fn build(&self) -> Connection {
        Connection::server(self.config.clone())
    }

    /// Drive an accepted transport until the connection closes.
    pub async fn serve<T>(&self, io: T, host: Arc<Host>) -> Result<(), Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        serve_connection(io, host, self.config.clone()).await
    }
}

/// Serve one transport with default configuration.
pub async fn serve<T>(io: T, host: Arc<Host>) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    serve_connection(io, host, Config::default()).await
}

async fn serve_connection<T>(mut io: T, host: Arc<Host>, config: Config) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::server(config);
    let mut pending: HashMap<StreamId, RequestCtx> = HashMap::new();
    let mut buf = BytesMut::with_capacity(16 * 1024);

    loop {
        while let Some(event) = conn.poll_event() {
            process_event(&mut conn, &host, &mut pending, event);
        }

        let out = conn.take_output();
        if !out.is_empty() {
            io.write_all(&out).await?;
            io.flush().await?;
        }

        if conn.is_closed() {
            return Ok(());
        }

        let n = io.read_buf(&mut buf).await?;
        if n == 0 {
            conn.recv_eof();
            return Ok(());
        }

        let chunk = buf.split();
        conn.on_bytes(&chunk)?;
    }
}

/// React to one engine event, dispatching requests once fully received.
fn process_event(
    conn: &mut Connection,
    host: &Arc<Host>,
    pending: &mut HashMap<StreamId, RequestCtx>,
    event: Event,
) {
    match event {
        Event::Request {
            stream_id,
            request,
            end_of_stream,
        } => {
            let mut ctx = RequestCtx::from_request(host.sessions().clone(), &request);
            attach_session(host, &mut ctx);

            if end_of_stream {
                dispatch_and_respond(conn, host, stream_id, ctx);
            } else {
                pending.insert(stream_id, ctx);
            }
        }
        Event::Data {
            stream_id,
            data,
            end_of_stream,
        } => {
            let complete = match pending.get_mut(&stream_id) {
                Some(ctx) => {
                    ctx.rx.body.extend_from_slice(&data);
                    end_of_stream
                }
                None => false,
            };

            if complete {
                let mut ctx = pending.remove(&stream_id).expect("checked above");
                ctx.rx.eof = true;
                ctx.parse_form_body();
                dispatch_and_respond(conn, host, stream_id, ctx);
            }
        }
        Event::Trailers { stream_id, .. } => {
            if let Some(mut ctx) = pending.remove(&stream_id) {
                ctx.rx.eof = true;
                ctx.parse_form_body();
                dispatch_and_respond(conn, host, stream_id, ctx);
            }
        }
        Event::Reset { stream_id, reason } => {
            tracing::debug!("stream {:?} reset; reason={:?}", stream_id, reason);
            pending.remove(&stream_id);
        }
        Event::GoAway {
            last_stream_id,
            reason,
            ..
        } => {
            tracing::debug!(
                "peer going away; last_stream_id={:?} reason={:?}",
                last_stream_id,
                reason
            );
        }
    }
}

/// Resolve the request's session from its cookie, when one is presented.
fn attach_session(host: &Arc<Host>, ctx: &mut RequestCtx) {
    let id = ctx.header("cookie").and_then(|cookies| {
        cookies.split(';').find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            if name == SESSION_COOKIE {
                Some(value.to_owned())
            } else {
                None
            }
        })
    });

    if let Some(id) = id {
        if host.sessions().exists(&id) {
            ctx.session_id = Some(id);
        }
    }
}

/// Route the request, run its handler, and hand the response back to the
/// engine.
fn dispatch_and_respond(
    conn: &mut Connection,
    host: &Arc<Host>,
    stream_id: StreamId,
    mut ctx: RequestCtx,
) {
    host.dispatch(&mut ctx);

    if !ctx.tx.finalized {
        if let Some(handler) = ctx.handler.clone() {
            if let Err(e) = handler.handle(&mut ctx) {
                tracing::error!("handler \"{}\" failed: {}", handler.name(), e);
                ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
            }
        }
    }

    if ctx.aborted {
        conn.reset_stream(stream_id, Reason::CANCEL);
        return;
    }

    // Honor a configured error document for error responses.
    if ctx.tx.status.is_client_error() || ctx.tx.status.is_server_error() {
        let document = ctx
            .route
            .as_ref()
            .and_then(|r| r.lookup_error_document(ctx.tx.status.as_u16()))
            .map(str::to_owned);
        if let Some(url) = document {
            ctx.redirect(StatusCode::FOUND, &url);
        }
    }

    let mut response = Response::builder().status(ctx.tx.status);

    for (name, value) in ctx.tx.headers.iter() {
        response = response.header(name, value);
    }
    if let Some(ref etag) = ctx.tx.etag {
        response = response.header("etag", etag.as_str());
    }
    if let Some(ref id) = ctx.session_id {
        response = response.header(
            "set-cookie",
            format!("{}={}; HttpOnly; Path=/", SESSION_COOKIE, id),
        );
    }

    let response = match response.body(()) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("invalid response head: {}", e);
            let mut fallback = Response::new(());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    };

    let mut units = vec![ResponseUnit::Headers(response)];
    if !ctx.tx.body.is_empty() && ctx.rx.method != "HEAD" {
        units.push(ResponseUnit::Data(ctx.tx.body.split().freeze()));
    }
    units.push(ResponseUnit::End);

    if let Err(e) = conn.write_response(stream_id, units) {
        tracing::debug!("response dropped on {:?}: {}", stream_id, e);
    }
}
