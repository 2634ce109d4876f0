//! Encrypted channel over a framed byte stream.
//!
//! [`SecureWriter::send`] is the wire's encode step: seal the plaintext,
//! length-prefix the sealed payload, write one frame. [`SecureReader::recv`]
//! is the decode step: reassemble exactly one frame, open it, and require the
//! plaintext to be UTF-8. A plaintext that is not valid UTF-8 counts as a
//! decryption failure, not a protocol error.

use crate::core::frame::FrameCodec;
use crate::error::{RelayError, Result};
use crate::utils::crypto::{Crypto, KEY_SIZE};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Receiving half of an encrypted channel.
pub struct SecureReader<R> {
    framed: FramedRead<R, FrameCodec>,
    crypto: Crypto,
}

impl<R: AsyncRead + Unpin> SecureReader<R> {
    pub fn new(reader: R, crypto: Crypto) -> Self {
        Self::with_codec(reader, crypto, FrameCodec::new())
    }

    pub fn with_codec(reader: R, crypto: Crypto, codec: FrameCodec) -> Self {
        Self {
            framed: FramedRead::new(reader, codec),
            crypto,
        }
    }

    /// Receive and decrypt one frame's plaintext.
    ///
    /// Returns `Ok(None)` on a clean close at a frame boundary. A close in
    /// the middle of a frame surfaces as a `Framing` error.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let frame = match self.framed.next().await {
            None => return Ok(None),
            Some(frame) => frame?,
        };

        let plaintext = self.crypto.open(&frame)?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| RelayError::DecryptionFailure)
    }
}

/// Sending half of an encrypted channel.
pub struct SecureWriter<W> {
    framed: FramedWrite<W, FrameCodec>,
    crypto: Crypto,
}

impl<W: AsyncWrite + Unpin> SecureWriter<W> {
    pub fn new(writer: W, crypto: Crypto) -> Self {
        Self::with_codec(writer, crypto, FrameCodec::new())
    }

    pub fn with_codec(writer: W, crypto: Crypto, codec: FrameCodec) -> Self {
        Self {
            framed: FramedWrite::new(writer, codec),
            crypto,
        }
    }

    /// Encrypt `plaintext` and write it as one frame.
    pub async fn send(&mut self, plaintext: &str) -> Result<()> {
        let payload = self.crypto.seal(plaintext.as_bytes())?;
        self.framed.send(Bytes::from(payload)).await
    }

    /// Flush pending frames and shut the transport's write side down.
    pub async fn close(&mut self) -> Result<()> {
        self.framed.close().await
    }
}

/// Split a duplex stream into an encrypted reader/writer pair sharing `key`.
pub fn secure_pair<S>(stream: S, key: &[u8; KEY_SIZE]) -> (SecureReader<ReadHalf<S>>, SecureWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        SecureReader::new(reader, Crypto::new(key)),
        SecureWriter::new(writer, Crypto::new(key)),
    )
}
