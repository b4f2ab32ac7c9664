use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    dispatch::{dispatch, DispatchError},
    mfs::Mfs,
    protocol::{Request, REQUEST_SIZE},
    storage::ImageStorage,
};

/// Answers requests arriving on a UDP socket, one at a time and in arrival order.
pub struct Server<S: ImageStorage> {
    socket: UdpSocket,
    mfs: Mfs<S>,
}

impl<S: ImageStorage> Server<S> {
    pub fn bind(addr: impl ToSocketAddrs, mfs: Mfs<S>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context("binding server socket")?;
        info!("listening on {}", socket.local_addr()?);

        Ok(Self { socket, mfs })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn mfs(&self) -> &Mfs<S> {
        &self.mfs
    }

    /// Serves requests until the image can no longer be persisted.
    pub fn serve(&mut self) -> Result<()> {
        loop {
            self.serve_one()?;
        }
    }

    /// Receives one datagram and answers it if it holds a request for a known command.
    pub fn serve_one(&mut self) -> Result<()> {
        // one spare byte so that oversized datagrams are noticed instead of truncated
        let mut buf = vec![0; REQUEST_SIZE + 1];
        let (len, peer) = self
            .socket
            .recv_from(&mut buf)
            .context("receiving request")?;

        let request = match Request::decode(&buf[..len]) {
            Ok(request) => request,
            Err(err) => {
                warn!("dropping malformed request from {peer}: {err:#}");
                return Ok(());
            }
        };

        let response = match dispatch(&mut self.mfs, &request) {
            Ok(response) => response,
            Err(DispatchError::UnknownCommand(name)) => {
                warn!("ignoring unknown command {name:?} from {peer}");
                return Ok(());
            }
            Err(err) => return Err(err).context("serving request"),
        };

        debug!("{peer}: {} -> {}", request.command_name(), response.result);

        if let Err(err) = self.socket.send_to(&response.encode()?, peer) {
            warn!("failed to reply to {peer}: {err}");
        }

        Ok(())
    }
}
