use super::error::PeerError;
use super::message::Message;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// An ordered, reliable, point-to-point byte channel to a named peer.
///
/// The harness supplies one link per distribution-capable peer pair; TCP in
/// production, [`tokio::io::duplex`] pairs in tests. No further transport
/// properties are assumed.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Link for T {}

/// Reads length-prefixed protocol frames off the inbound half of a link.
pub struct MessageReader<R> {
    stream: R,
    read_buf: BytesMut,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    /// Receives the next message, blocking until a whole frame is buffered.
    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        while self.read_buf.len() < 4 {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        let total_len = 4 + length;
        while self.read_buf.len() < total_len {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }
}

/// Writes protocol frames onto the outbound half of a link.
pub struct MessageWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
