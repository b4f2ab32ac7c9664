//! A blocking client for the server.
//!
//! Every request is retried until a response arrives. Since the server treats repeated creates,
//! unlinks and writes as no-ops, retrying is always safe.

use std::ffi::CStr;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use thiserror::Error;

use crate::{
    disk_format::block::Block,
    protocol::{Command, EntryKind, Request, Response, WireStat, RESPONSE_SIZE},
};

/// How long to wait for a response before resending a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The server answered a request with a failure result.
#[derive(Debug, Error)]
#[error("server rejected {command} request")]
pub struct Rejected {
    pub command: Command,
}

pub struct MfsClient {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
}

impl MfsClient {
    pub fn connect(server: impl ToSocketAddrs) -> Result<Self> {
        Self::with_timeout(server, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(server: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let server = server
            .to_socket_addrs()
            .context("resolving server address")?
            .next()
            .ok_or_else(|| anyhow!("server address resolved to nothing"))?;

        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).context("binding client socket")?;
        socket
            .set_read_timeout(Some(timeout))
            .context("setting socket timeout")?;

        Ok(Self {
            socket,
            server,
            timeout,
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// The inode number of `name` in the directory `parent_inum`.
    pub fn lookup(&self, parent_inum: i32, name: &CStr) -> Result<i32> {
        let response = self.call(Command::Lookup, &Request::lookup(parent_inum, name)?)?;
        Ok(response.result)
    }

    pub fn stat(&self, inum: i32) -> Result<WireStat> {
        let response = self.call(Command::Stat, &Request::stat(inum))?;
        Ok(response.stat)
    }

    pub fn read(&self, inum: i32, block: i32) -> Result<Block> {
        let response = self.call(Command::Read, &Request::read(inum, block))?;
        Ok(response.payload)
    }

    pub fn write(&self, inum: i32, block: i32, data: &Block) -> Result<()> {
        self.call(Command::Write, &Request::write(inum, block, data))?;
        Ok(())
    }

    pub fn create(&self, parent_inum: i32, kind: EntryKind, name: &CStr) -> Result<()> {
        self.call(Command::Create, &Request::create(parent_inum, kind, name)?)?;
        Ok(())
    }

    pub fn unlink(&self, parent_inum: i32, name: &CStr) -> Result<()> {
        self.call(Command::Unlink, &Request::unlink(parent_inum, name)?)?;
        Ok(())
    }

    fn call(&self, command: Command, request: &Request) -> Result<Response> {
        let response = self.exchange(request)?;

        if !response.is_success() {
            return Err(Rejected { command }.into());
        }

        Ok(response)
    }

    /// Sends `request` until a well-formed response arrives from the server.
    fn exchange(&self, request: &Request) -> Result<Response> {
        let bytes = request.encode()?;
        let mut buf = vec![0; RESPONSE_SIZE + 1];

        loop {
            self.socket
                .send_to(&bytes, self.server)
                .context("sending request")?;

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if from == self.server => match Response::decode(&buf[..len]) {
                    Ok(response) => {
                        debug!("{}: result {}", request.command_name(), response.result);
                        return Ok(response);
                    }
                    Err(err) => warn!("discarding malformed response: {err:#}"),
                },
                Ok((_, from)) => warn!("discarding datagram from {from}"),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    warn!(
                        "no response to {} after {:?}, retrying",
                        request.command_name(),
                        self.timeout
                    );
                }
                Err(err) => return Err(err).context("receiving response"),
            }
        }
    }
}
