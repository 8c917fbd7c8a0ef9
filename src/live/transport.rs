//! # Live Transport Seam
//!
//! The session controller never talks to a socket directly. It asks a `LiveConnector`
//! for a connection and gets back a `LiveTransport` it can push audio into. Inbound
//! traffic flows the other way, through the `EventSender` handed to `connect`.
//!
//! ## Rust Concepts:
//! - **async_trait**: Lets traits have `async fn` while remaining object safe, so the
//!   controller can hold `Arc<dyn LiveConnector>` and `Box<dyn LiveTransport>`.
//! - **Send + Sync bounds**: Transports are driven from spawned tokio tasks.

use crate::audio::pcm::EncodedChunk;
use crate::error::LiveError;
use crate::live::events::EventSender;
use async_trait::async_trait;

/// An open bidirectional connection to the live endpoint.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Queue one audio chunk for sending. Never waits on the network.
    fn send_audio(&self, chunk: EncodedChunk) -> Result<(), LiveError>;

    /// Close the connection. Calling it twice is harmless.
    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Opens connections configured with a system directive.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a connection and wait until the endpoint acknowledges setup.
    ///
    /// ## Parameters:
    /// - **directive**: System instruction for the voice model
    /// - **events**: Receives every inbound event for the lifetime of the connection
    ///
    /// ## Returns:
    /// - **Ok(transport)**: Connection is ready for audio
    /// - **Err(LiveError::ConnectionFailed)**: Could not connect or setup was refused
    async fn connect(
        &self,
        directive: &str,
        events: EventSender,
    ) -> Result<Box<dyn LiveTransport>, LiveError>;
}
