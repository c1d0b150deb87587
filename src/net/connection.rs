// TCP connection handler
// Line-delimited connection to the anchor network gateway

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::SurveyResult;
use crate::net::messages::LinkMessage;

/// A single TCP connection to the gateway
pub struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();

        Connection {
            lines: BufReader::new(read_half).lines(),
            writer: BufWriter::new(write_half),
            peer_addr,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next line, without its terminator. `None` once the peer closes.
    ///
    /// Cancel safe, so it can sit in a `select!` next to the writers.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let line = self.lines.next_line().await?;
        Ok(line.map(|mut l| {
            if l.ends_with('\r') {
                l.pop();
            }
            l
        }))
    }

    /// Write one message followed by a newline
    pub async fn write_message(&mut self, message: &LinkMessage) -> SurveyResult<()> {
        let line = message.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}
