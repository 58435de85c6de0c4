//! TCP line uplink toward the monitoring endpoint

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use swarmlink_mesh::{LineUplink, Uplink, UplinkRecord};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects lazily and reconnects on the next publish after a write failure
pub struct TcpUplink {
    endpoint: String,
    line: Option<LineUplink<TcpStream>>,
}

impl TcpUplink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            line: None,
        }
    }

    fn connect(&self) -> io::Result<LineUplink<TcpStream>> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "endpoint did not resolve");
        for addr in self.endpoint.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(CONNECT_TIMEOUT))?;
                    debug!(endpoint = %self.endpoint, "endpoint uplink connected");
                    return Ok(LineUplink::new(stream));
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl Uplink for TcpUplink {
    fn publish(&mut self, record: &UplinkRecord) -> io::Result<()> {
        let mut line = match self.line.take() {
            Some(line) => line,
            None => self.connect()?,
        };
        line.publish(record)?;
        self.line = Some(line);
        Ok(())
    }
}
