use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use crate::protocol::{AsciiCodec, TelemetrySchema, LINE_TERMINATOR};
use crate::transport::stream::is_timeout;

/// One remote client of the line protocol
pub trait RemotePeer {
    /// Refreshes and reports liveness
    fn is_connected(&mut self) -> bool;

    /// Next complete line, if one has arrived; never blocks
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Sends one line; a terminator is appended when missing
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Human-readable peer identity for logs
    fn label(&self) -> String;
}

/// Source of remote peers
pub trait RemoteListener {
    type Peer: RemotePeer;

    /// Accepts a waiting peer without blocking
    fn accept(&mut self) -> Result<Option<Self::Peer>>;
}

/// Non-blocking TCP listener for the line protocol
pub struct TcpRemoteListener {
    listener: TcpListener,
    max_line_length: usize,
}

impl TcpRemoteListener {
    /// Binds with address reuse so a restarted bridge can take the port back
    pub fn bind(addr: SocketAddr, max_line_length: usize) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(4)?;
        socket.set_nonblocking(true)?;

        let listener: TcpListener = socket.into();
        info!(addr = %listener.local_addr()?, "bridge listening");
        Ok(TcpRemoteListener {
            listener,
            max_line_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl RemoteListener for TcpRemoteListener {
    type Peer = TcpPeer;

    fn accept(&mut self) -> Result<Option<TcpPeer>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Ok(Some(TcpPeer::new(stream, addr, self.max_line_length)))
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A connected TCP client
pub struct TcpPeer {
    stream: TcpStream,
    addr: SocketAddr,
    read_buf: BytesMut,
    lines: AsciiCodec,
    connected: bool,
}

impl TcpPeer {
    fn new(stream: TcpStream, addr: SocketAddr, max_line_length: usize) -> Self {
        TcpPeer {
            stream,
            addr,
            read_buf: BytesMut::with_capacity(max_line_length * 2),
            lines: AsciiCodec::with_max_line_length(TelemetrySchema::Minimal, max_line_length),
            connected: true,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn drop_connection(&mut self, reason: &str) {
        if self.connected {
            info!(peer = %self.addr, reason, "client disconnected");
        }
        self.connected = false;
    }
}

impl RemotePeer for TcpPeer {
    fn is_connected(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) if self.read_buf.is_empty() => self.drop_connection("end of stream"),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                warn!(peer = %self.addr, err = %e, "liveness check failed");
                self.drop_connection("socket error");
            }
        }
        self.connected
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut chunk = [0u8; 128];
        loop {
            match self.lines.decode(&mut self.read_buf) {
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => {}
                Err(err) => {
                    warn!(peer = %self.addr, %err, "discarding remote line");
                    continue;
                }
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.drop_connection("end of stream");
                    return Ok(None);
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => {
                    self.drop_connection("read error");
                    return Err(e.into());
                }
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::disconnected(format!("{} is gone", self.addr)));
        }
        let mut out = String::with_capacity(line.len() + 1);
        out.push_str(line);
        if !line.ends_with(LINE_TERMINATOR) {
            out.push(LINE_TERMINATOR);
        }
        if let Err(e) = self.stream.write_all(out.as_bytes()) {
            self.drop_connection("write error");
            return Err(e.into());
        }
        debug!(peer = %self.addr, line = out.trim_end(), "sent to client");
        Ok(())
    }

    fn label(&self) -> String {
        self.addr.to_string()
    }
}
