//! Buffered RESP connection over a TCP stream
//!
//! Reads are cancel-safe: partially received frames stay in the read buffer,
//! so `read_frame` can sit inside a `tokio::select!` next to the shutdown and
//! replica notification branches without losing input.

use crate::resp::{Frame, FrameError, MAX_LINE_LEN};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Framed connection
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    peer: Option<SocketAddr>,
}

impl Connection {
    /// Wrap an accepted or connected socket
    pub fn new(socket: TcpStream) -> Connection {
        let peer = socket.peer_addr().ok();
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
            peer,
        }
    }

    /// Remote address, if the OS reported one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Read the next frame. `Ok(None)` means the peer closed cleanly between
    /// frames; closing mid-frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.read_frame_raw().await?.map(|(frame, _)| frame))
    }

    /// Read the next frame together with the exact bytes it was decoded from
    pub async fn read_frame_raw(&mut self) -> Result<Option<(Frame, Bytes)>> {
        loop {
            if let Some(parsed) = self.parse_frame()? {
                return Ok(Some(parsed));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<(Frame, Bytes)>> {
        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(()) => {
                let len = buf.position() as usize;
                buf.set_position(0);
                let frame = Frame::parse(&mut buf)?;
                let raw = self.buffer.split_to(len).freeze();
                Ok(Some((frame, raw)))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a `$<len>\r\n<payload>` transfer that has no trailing CRLF, as
    /// used for full-resync snapshots.
    pub async fn read_bulk_payload(&mut self) -> Result<Bytes> {
        let len = loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                if self.buffer.first() != Some(&b'$') {
                    return Err(Error::protocol("expected snapshot bulk header"));
                }
                let len = std::str::from_utf8(&self.buffer[1..pos])
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| Error::protocol("invalid snapshot length"))?;
                self.buffer.advance(pos + 2);
                break len;
            }
            if self.buffer.len() > MAX_LINE_LEN {
                return Err(Error::protocol("snapshot bulk header too long"));
            }
            self.fill().await?;
        };

        while self.buffer.len() < len {
            self.fill().await?;
        }
        Ok(self.buffer.split_to(len).freeze())
    }

    async fn fill(&mut self) -> Result<()> {
        if 0 == self.stream.read_buf(&mut self.buffer).await? {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        Ok(())
    }

    /// Write a frame and flush
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.write_raw(&out).await
    }

    /// Write pre-encoded bytes and flush
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::encode_command;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Connection::new(server), client)
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_writes() {
        let (mut conn, mut client) = pair().await;

        let raw = encode_command(&["SET", "key", "value"]);
        client.write_all(&raw[..5]).await.unwrap();
        client.flush().await.unwrap();
        let reader = tokio::spawn(async move {
            let got = conn.read_frame_raw().await.unwrap().unwrap();
            (got, conn)
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(&raw[5..]).await.unwrap();

        let ((frame, bytes), _conn) = reader.await.unwrap();
        assert_eq!(bytes, raw);
        assert_eq!(frame.into_args().unwrap(), vec!["SET", "key", "value"]);
    }

    #[tokio::test]
    async fn test_clean_close_returns_none() {
        let (mut conn, client) = pair().await;
        drop(client);
        assert!(conn.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_payload_without_trailing_crlf() {
        let (mut conn, mut client) = pair().await;
        client
            .write_all(b"$5\r\nhello*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();

        let payload = conn.read_bulk_payload().await.unwrap();
        assert_eq!(&payload[..], b"hello");

        let next = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(next.into_args().unwrap(), vec!["PING"]);
    }
}
