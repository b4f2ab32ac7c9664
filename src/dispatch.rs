use std::ffi::CStr;

use anyhow::anyhow;
use log::{debug, error, warn};
use thiserror::Error;

use crate::{
    error::FsError,
    mfs::{InodeNumber, Mfs},
    protocol::{Command, EntryKind, Request, Response, WireStat, FAILURE, SUCCESS},
    storage::ImageStorage,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request named a command the server doesn't know. No operation ran.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// The image could not be persisted. The server cannot continue.
    #[error("storage failure")]
    Storage(#[source] FsError),
}

/// Runs the operation `request` asks for and packages its outcome into a response.
///
/// Operation failures become a [`FAILURE`] result. Only unknown commands and storage failures
/// are errors.
pub fn dispatch<S: ImageStorage>(
    mfs: &mut Mfs<S>,
    request: &Request,
) -> Result<Response, DispatchError> {
    let command = request
        .command()
        .map_err(|_| DispatchError::UnknownCommand(request.command_name()))?;

    debug!(
        "{command} (inum = {}; block = {}; kind = {})",
        request.inum, request.block, request.kind
    );

    let mut response = Response::default();

    match execute(mfs, command, request, &mut response) {
        Ok(result) => response.result = result,
        Err(err) if err.is_fatal() => {
            error!("{command} failed to persist: {err:#}");
            return Err(DispatchError::Storage(err));
        }
        Err(err) => {
            if err.is_capacity() {
                warn!("{command} ran out of space: {err}");
            } else {
                warn!("{command} failed: {err}");
            }

            response = Response::default();
        }
    }

    Ok(response)
}

fn execute<S: ImageStorage>(
    mfs: &mut Mfs<S>,
    command: Command,
    request: &Request,
    response: &mut Response,
) -> Result<i32, FsError> {
    let inum = inode_number(request.inum)?;

    match command {
        Command::Create => {
            let kind = request
                .entry_kind()
                .map_err(|_| FsError::InvalidKind)?;
            mfs.create(inum, kind.into(), filename(request)?)?;
        }
        Command::Lookup => {
            let found = mfs.lookup(inum, filename(request)?)?;
            return Ok(found as i32);
        }
        Command::Stat => {
            let stat = mfs.stat(inum)?;
            let kind = EntryKind::try_from(stat.kind).map_err(FsError::Corrupt)?;

            response.stat = WireStat {
                kind,
                size: stat.size,
                blocks: stat.blocks,
            };
        }
        Command::Write => {
            mfs.write_block(inum, block_offset(request.block)?, &request.payload)?;
        }
        Command::Read => {
            let data = mfs.read_block(inum, block_offset(request.block)?)?;
            if data.len() > response.payload.len() {
                return Err(FsError::Corrupt(anyhow!("read {} bytes", data.len())));
            }

            response.payload[..data.len()].copy_from_slice(&data);
        }
        Command::Unlink => {
            mfs.unlink(inum, filename(request)?)?;
        }
    }

    Ok(SUCCESS)
}

fn inode_number(inum: i32) -> Result<InodeNumber, FsError> {
    InodeNumber::try_from(inum).map_err(|_| FsError::InvalidInode(inum.into()))
}

fn block_offset(block: i32) -> Result<usize, FsError> {
    usize::try_from(block).map_err(|_| FsError::InvalidOffset(block.into()))
}

fn filename(request: &Request) -> Result<&CStr, FsError> {
    request
        .filename()
        .map_err(|err| FsError::InvalidName(err.to_string()))
}
