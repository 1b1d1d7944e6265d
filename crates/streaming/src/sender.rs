//! Outbound connections to other members.
//!
//! Every exchange opens a fresh TCP connection, sends one request frame and,
//! depending on the exchange, reads reply frames and/or a raw byte stream.
//! All blocking steps are bounded by the timeouts in `TransportConfig` so a
//! single stalled peer never blocks a protocol loop indefinitely.

use corelib::MemberIdentity;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec::{read_frame, write_frame};
use crate::error::{Result, StreamingError};
use crate::protocol::{FileMessage, Message};
use crate::receiver::{receive_file, send_file};

/// Timeouts applied to outbound exchanges.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Writing a request or reading one reply frame.
    pub io_timeout: Duration,
    /// Moving a whole file body in either direction.
    pub transfer_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(10),
            transfer_timeout: Duration::from_secs(60),
        }
    }
}

/// Client side of the member wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transport {
    config: TransportConfig,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Fire-and-forget: deliver `message` and close.
    pub async fn send(&self, to: &MemberIdentity, message: &Message) -> Result<()> {
        let mut stream = self.connect(&to.address()).await?;
        self.bounded("sending request", write_frame(&mut stream, message))
            .await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Send `message` and wait for a single reply frame.
    pub async fn request<T>(&self, to: &MemberIdentity, message: &Message) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_at(&to.address(), message).await
    }

    /// Request/reply against an arbitrary `host:port` (used for the introducer).
    pub async fn request_at<Req, Resp>(&self, address: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut stream = self.connect(address).await?;
        self.bounded("sending request", write_frame(&mut stream, request))
            .await?;
        self.bounded("awaiting reply", read_frame(&mut stream)).await
    }

    /// Like `request`, but the reply only comes after the peer has moved a
    /// whole file (a Replicate order), so it is bounded by the transfer timeout.
    pub async fn request_after_transfer<T>(&self, to: &MemberIdentity, message: &Message) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut stream = self.connect(&to.address()).await?;
        self.bounded("sending request", write_frame(&mut stream, message))
            .await?;
        self.bounded_transfer("awaiting transfer outcome", read_frame(&mut stream))
            .await
    }

    /// Put flow: send the request, and if the peer acknowledges with `Ok`,
    /// stream `source`, half-close, and wait for the peer's confirmation that
    /// the bytes were persisted.
    ///
    /// Returns the first non-`Ok` reply, or the final confirmation.
    pub async fn push_file(
        &self,
        to: &MemberIdentity,
        message: &Message,
        source: &Path,
    ) -> Result<FileMessage> {
        let mut stream = self.connect(&to.address()).await?;
        self.bounded("sending request", write_frame(&mut stream, message))
            .await?;

        let ack: FileMessage = self
            .bounded("awaiting acknowledgment", read_frame(&mut stream))
            .await?;
        if !ack.is_ok() {
            return Ok(ack);
        }

        self.bounded_transfer("streaming file", async {
            send_file(&mut stream, source).await?;
            stream.shutdown().await?;
            Ok::<_, StreamingError>(())
        })
        .await?;

        self.bounded("awaiting confirmation", read_frame(&mut stream))
            .await
    }

    /// Get flow: send the request, and if the peer acknowledges with `Ok`,
    /// read the byte stream to EOF into `destination`.
    ///
    /// Returns the acknowledgment; `destination` is written only when it is
    /// `Ok` and the stream completed with the length the acknowledgment
    /// announced.
    pub async fn pull_file(
        &self,
        from: &MemberIdentity,
        message: &Message,
        destination: &Path,
    ) -> Result<FileMessage> {
        let mut stream = self.connect(&from.address()).await?;
        self.bounded("sending request", write_frame(&mut stream, message))
            .await?;

        let ack: FileMessage = self
            .bounded("awaiting acknowledgment", read_frame(&mut stream))
            .await?;
        if ack.is_ok() {
            self.bounded_transfer("receiving file", async {
                receive_file(&mut stream, destination, ack.size).await?;
                Ok::<_, StreamingError>(())
            })
            .await?;
        }
        Ok(ack)
    }

    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| StreamingError::Timeout("connecting"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.config.io_timeout, fut)
            .await
            .map_err(|_| StreamingError::Timeout(what))?
    }

    async fn bounded_transfer<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.config.transfer_timeout, fut)
            .await
            .map_err(|_| StreamingError::Timeout(what))?
    }
}
