//! Error taxonomy for the engine.
//!
//! Mirrors the source repo's split between a library-wide error and a
//! collaborator-specific error (`HlsError` / `FfmpegError`), composed with
//! `#[from]` so call sites can use `?` throughout.

use thiserror::Error;

/// Errors from the underlying fMP4 muxer collaborator.
#[derive(Error, Debug)]
pub enum MuxerError {
    #[error("muxer initialization failed: {0}")]
    Init(String),

    #[error("failed to add stream: {0}")]
    AddStream(String),

    #[error("failed to write header: {0}")]
    WriteHeader(String),

    #[error("failed to write packet: {0}")]
    WritePacket(String),

    #[error("failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("muxer entered a failed state: {0}")]
    Failed(String),

    #[error("codec parameters changed mid-session, cannot reuse captured init segment")]
    CodecParamsChanged,
}

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid knob combination; surfaced synchronously from `start`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// TCP socket create/bind/listen failure; surfaced synchronously.
    #[error("bind error: {0}")]
    Bind(String),

    /// The underlying muxer refused a sample or failed outright.
    #[error("muxer error: {0}")]
    Muxer(#[from] MuxerError),

    /// Missing segment or unknown route.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request on a retired random path within the grace window.
    #[error("gone: {0}")]
    Gone(String),

    /// Path traversal attempt or other disallowed request shape.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Any uncaught failure inside a request handler.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
