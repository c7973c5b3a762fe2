//! Error kinds shared by every layer of the message plane.
//!
//! Internal layers (`Interface`, `Protocol`, `LocalEngine`, `LinkEngine`) return
//! `Result<T, CoreError>`. Public-facing endpoint operations keep the `bool`
//! shape the original design used, logging the `CoreError` before collapsing it.

use thiserror::Error;

/// Errors surfaced by the network interface, protocol, and engine layers.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An engine could not open its underlying transport (device or shared region).
    #[error("transport unavailable: {0}")]
    TransportDown(String),

    /// The interface's fixed buffer pool had nothing free to allocate.
    #[error("frame buffer pool exhausted")]
    BufferExhausted,

    /// A message or frame exceeded the maximum size for its layer.
    #[error("message of {size} bytes exceeds maximum of {max} bytes")]
    OversizeMessage { size: usize, max: usize },

    /// The operation was attempted on an endpoint that has been closed.
    #[error("endpoint is closed")]
    Closed,

    /// An inbound frame had no observer registered for its destination port.
    #[error("no observer registered for port {port}")]
    NoObserver { port: u32 },

    /// A received frame was shorter than the minimum link header.
    #[error("frame of {size} bytes is shorter than the link header")]
    ShortFrame { size: usize },

    /// The caller-provided buffer was too small for the inbound payload.
    #[error("payload of {needed} bytes does not fit the {available}-byte buffer")]
    UserBufferTooSmall { needed: usize, available: usize },

    /// A blocked receiver woke to a null sentinel because its endpoint closed.
    #[error("receive woke to shutdown sentinel")]
    ShutdownWake,
}

/// `RingFull` is intentionally not a `CoreError` variant: `LocalEngine::send`
/// blocks on the `space` semaphore rather than failing, matching the ring's
/// documented backpressure behavior.
pub type CoreResult<T> = Result<T, CoreError>;
