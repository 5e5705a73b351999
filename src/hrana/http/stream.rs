use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::time::{Duration, Instant};

use super::super::ProtocolError;
use super::Server;

/// How long a released stream stays usable without being touched. Every successful pipeline
/// response resets the clock, so a client that pings regularly keeps its stream alive.
const EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// How often the background task sweeps expired streams that no request has tripped over.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Mutable state related to streams, owned by [`Server`] and protected with a mutex.
///
/// Streams are keyed by their current baton. A lookup consumes the entry, so a baton can never
/// be presented twice: of two racing requests, the second finds nothing and fails, which is
/// what serializes pipelines on a stream.
pub struct ServerStreamState {
    handles: HashMap<String, Handle>,
}

struct Handle {
    stream: Box<Stream>,
    expires_at: Instant,
}

/// State of a Hrana-over-HTTP stream: the SQL texts stored with `store_sql`, and whether a
/// `close` request has retired it.
#[derive(Debug, Default)]
pub(crate) struct Stream {
    sqls: HashMap<i32, String>,
    closed: bool,
}

/// Guard holding a stream checked out of the registry for the duration of one pipeline
/// request. Releasing mints the next baton and re-registers the stream; dropping without
/// release destroys it.
pub struct Guard<'srv> {
    server: &'srv Server,
    stream: Option<Box<Stream>>,
}

/// An unrecoverable error that closes the stream without being the client's protocol
/// violation.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("The stream has expired due to inactivity")]
    StreamExpired,
}

impl ServerStreamState {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }
}

impl Default for ServerStreamState {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquire a guard to a new or existing stream. If baton is `Some`, we look the stream up and
/// consume the baton; otherwise we create a fresh stream.
pub fn acquire<'srv>(server: &'srv Server, baton: Option<&str>) -> Result<Guard<'srv>> {
    let stream = match baton {
        Some(baton) => {
            let mut state = server.stream_state().lock();
            let handle = state
                .handles
                .remove(baton)
                .ok_or(ProtocolError::BatonInvalid)
                .with_context(|| format!("No stream handle for baton {}…", fragment(baton)))?;

            if handle.expires_at <= Instant::now() {
                tracing::debug!("stream for baton {}… had expired", fragment(baton));
                return Err(StreamError::StreamExpired)
                    .with_context(|| format!("Stream for baton {}… is expired", fragment(baton)));
            }

            tracing::debug!("stream acquired with baton {}…", fragment(baton));
            handle.stream
        }
        None => {
            tracing::debug!("created a new stream");
            Box::<Stream>::default()
        }
    };
    Ok(Guard {
        server,
        stream: Some(stream),
    })
}

impl<'srv> Guard<'srv> {
    /// Fails with [`ProtocolError::BatonStreamClosed`] once a `close` request has retired the
    /// stream in this pipeline.
    pub fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.stream.as_ref().unwrap().closed {
            Err(ProtocolError::BatonStreamClosed)
        } else {
            Ok(())
        }
    }

    /// Marks the stream for destruction once the current pipeline completes. The response will
    /// carry a null baton.
    pub fn close(&mut self) {
        self.stream.as_mut().unwrap().closed = true;
    }

    pub fn sqls(&self) -> &HashMap<i32, String> {
        &self.stream.as_ref().unwrap().sqls
    }

    pub fn sqls_mut(&mut self) -> &mut HashMap<i32, String> {
        &mut self.stream.as_mut().unwrap().sqls
    }

    /// Releases the guard and returns the baton for the next pipeline on this stream, or
    /// `None` if the stream has been closed.
    pub fn release(mut self) -> Option<String> {
        let stream = self.stream.take().unwrap();
        if stream.closed {
            tracing::debug!("stream was closed");
            return None;
        }

        let baton = gen_baton();
        let mut state = self.server.stream_state().lock();
        state.handles.insert(
            baton.clone(),
            Handle {
                stream,
                expires_at: Instant::now() + EXPIRATION,
            },
        );
        tracing::debug!("stream released with baton {}…", fragment(&baton));
        Some(baton)
    }
}

impl<'srv> Drop for Guard<'srv> {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("stream dropped without release");
        }
    }
}

/// 256 bits from the thread-local CSPRNG, hex-encoded. The baton space is large enough that
/// collisions need no handling beyond the map insert.
fn gen_baton() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn fragment(baton: &str) -> &str {
    &baton[..baton.len().min(8)]
}

/// Periodically drops streams whose expiration has passed without any request touching them.
/// Lookup already evicts lazily; this keeps abandoned streams from accumulating. The returned
/// future never resolves.
pub async fn run_expire(server: &Server) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let now = Instant::now();
        let mut state = server.stream_state().lock();
        let before = state.handles.len();
        state.handles.retain(|_, handle| handle.expires_at > now);
        let expired = before - state.handles.len();
        if expired > 0 {
            tracing::debug!("expired {expired} idle streams");
        }
    }
}
