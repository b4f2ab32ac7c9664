//! Request and response envelopes exchanged between client and server.
//!
//! Both envelopes have a fixed size: every field is present in every message, whether or not
//! the command uses it.

use std::ffi::CStr;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::disk_format::{
    block::{Block, BLOCK_SIZE, EMPTY_BLOCK},
    directory_entry::NAME_FIELD_LEN,
    inode::InodeKind,
};

/// The size of the command name field.
pub const COMMAND_NAME_LEN: usize = 16;

/// The number of bytes in a serialized [`Request`].
pub const REQUEST_SIZE: usize = COMMAND_NAME_LEN + 4 + NAME_FIELD_LEN + 4 + 4 + BLOCK_SIZE;

/// The number of bytes in a serialized [`Response`].
pub const RESPONSE_SIZE: usize = 3 * 4 + BLOCK_SIZE + 4;

/// The result code of a failed request.
pub const FAILURE: i32 = -1;

/// The result code of a successful request, except lookups which return an inode number.
pub const SUCCESS: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Create,
    Lookup,
    Stat,
    Write,
    Read,
    Unlink,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Lookup => "lookup",
            Command::Stat => "stat",
            Command::Write => "write",
            Command::Read => "read",
            Command::Unlink => "unlink",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let command = match s {
            "create" => Command::Create,
            "lookup" => Command::Lookup,
            "stat" => Command::Stat,
            "write" => Command::Write,
            "read" => Command::Read,
            "unlink" => Command::Unlink,
            _ => return Err(anyhow!("unknown command: {s:?}")),
        };

        Ok(command)
    }
}

/// The kind of entry a request creates, or a stat reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum EntryKind {
    #[default]
    Directory = 0,
    File = 1,
}

impl From<EntryKind> for InodeKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Directory => InodeKind::Directory,
            EntryKind::File => InodeKind::File,
        }
    }
}

impl TryFrom<u32> for EntryKind {
    type Error = anyhow::Error;

    fn try_from(kind: u32) -> Result<Self> {
        match kind {
            0 => Ok(EntryKind::Directory),
            1 => Ok(EntryKind::File),
            _ => Err(anyhow!("unknown entry kind: {kind}")),
        }
    }
}

impl TryFrom<InodeKind> for EntryKind {
    type Error = anyhow::Error;

    fn try_from(kind: InodeKind) -> Result<Self> {
        match kind {
            InodeKind::Directory => Ok(EntryKind::Directory),
            InodeKind::File => Ok(EntryKind::File),
            InodeKind::Empty => Err(anyhow!("free inodes have no entry kind")),
        }
    }
}

/// A nul-padded fixed-size field holding a C string.
fn fixed_cstr<const N: usize>(field: &[u8; N]) -> Result<&CStr> {
    CStr::from_bytes_until_nul(field).context("field is not nul-terminated")
}

fn to_fixed<const N: usize>(value: &[u8]) -> Result<[u8; N]> {
    ensure!(value.len() < N, "{} bytes do not fit in a {N}-byte field", value.len());

    let mut field = [0; N];
    field[..value.len()].copy_from_slice(value);

    Ok(field)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// The command name, kept as raw bytes so that unknown commands still decode.
    command: [u8; COMMAND_NAME_LEN],
    /// The target inode: the parent directory for create, lookup and unlink.
    pub inum: i32,
    #[serde(with = "BigArray")]
    filename: [u8; NAME_FIELD_LEN],
    /// An [`EntryKind`], left raw since only create reads it.
    pub kind: u32,
    /// The logical block for read and write.
    pub block: i32,
    #[serde(with = "BigArray")]
    pub payload: Block,
}

impl Request {
    fn new(command: Command, inum: i32) -> Self {
        Self {
            command: to_fixed(command.as_str().as_bytes()).expect("command names are short"),
            inum,
            filename: [0; NAME_FIELD_LEN],
            kind: EntryKind::default() as u32,
            block: 0,
            payload: EMPTY_BLOCK,
        }
    }

    pub fn lookup(parent_inum: i32, name: &CStr) -> Result<Self> {
        Self::new(Command::Lookup, parent_inum).with_filename(name)
    }

    pub fn create(parent_inum: i32, kind: EntryKind, name: &CStr) -> Result<Self> {
        let mut request = Self::new(Command::Create, parent_inum).with_filename(name)?;
        request.kind = kind as u32;

        Ok(request)
    }

    pub fn stat(inum: i32) -> Self {
        Self::new(Command::Stat, inum)
    }

    pub fn read(inum: i32, block: i32) -> Self {
        let mut request = Self::new(Command::Read, inum);
        request.block = block;

        request
    }

    pub fn write(inum: i32, block: i32, payload: &Block) -> Self {
        let mut request = Self::new(Command::Write, inum);
        request.block = block;
        request.payload = *payload;

        request
    }

    pub fn unlink(parent_inum: i32, name: &CStr) -> Result<Self> {
        Self::new(Command::Unlink, parent_inum).with_filename(name)
    }

    /// A request carrying an arbitrary command name.
    pub fn raw(command: &str, inum: i32) -> Result<Self> {
        let mut request = Self::new(Command::Stat, inum);
        request.command = to_fixed(command.as_bytes())?;

        Ok(request)
    }

    fn with_filename(mut self, name: &CStr) -> Result<Self> {
        self.filename = to_fixed(name.to_bytes())?;
        Ok(self)
    }

    /// The command name as sent, up to the first nul byte.
    pub fn command_name(&self) -> String {
        match fixed_cstr(&self.command) {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(_) => String::from_utf8_lossy(&self.command).into_owned(),
        }
    }

    pub fn entry_kind(&self) -> Result<EntryKind> {
        EntryKind::try_from(self.kind)
    }

    pub fn command(&self) -> Result<Command> {
        let name = fixed_cstr(&self.command)?
            .to_str()
            .context("command name is not UTF-8")?;

        name.parse()
    }

    pub fn filename(&self) -> Result<&CStr> {
        fixed_cstr(&self.filename)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("serializing request")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == REQUEST_SIZE,
            "request is {} bytes, expected {REQUEST_SIZE}",
            bytes.len()
        );

        bincode::deserialize(bytes).context("parsing request")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStat {
    pub kind: EntryKind,
    pub size: u32,
    pub blocks: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub stat: WireStat,
    #[serde(with = "BigArray")]
    pub payload: Block,
    /// [`SUCCESS`], [`FAILURE`], or the inode number found by a lookup.
    pub result: i32,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            stat: WireStat::default(),
            payload: EMPTY_BLOCK,
            result: FAILURE,
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.result >= 0
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("serializing response")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == RESPONSE_SIZE,
            "response is {} bytes, expected {RESPONSE_SIZE}",
            bytes.len()
        );

        bincode::deserialize(bytes).context("parsing response")
    }
}
