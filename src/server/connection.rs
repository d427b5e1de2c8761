//! Buffered framing over one client socket.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::frame;
use crate::constants::MAX_REQUEST_SIZE;
use crate::error::ServerError;
use crate::reply::Reply;

pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read one command. `Ok(None)` means the peer closed cleanly between
    /// frames. Empty argument vectors (blank inline lines) are skipped.
    pub async fn read_command(&mut self) -> Result<Option<Vec<String>>, ServerError> {
        loop {
            if let Some(args) = frame::parse_command(&mut self.read_buf)? {
                if args.is_empty() {
                    continue;
                }
                return Ok(Some(args));
            }
            if self.read_buf.len() > MAX_REQUEST_SIZE {
                return Err(ServerError::Protocol {
                    message: "request exceeds maximum frame size".to_string(),
                });
            }
            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ServerError::Protocol {
                    message: "connection closed mid-frame".to_string(),
                });
            }
        }
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ServerError> {
        self.write_buf.clear();
        frame::encode_reply(reply, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn write_error(&mut self, message: &str) -> Result<(), ServerError> {
        self.write_buf.clear();
        frame::encode_error(message, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
