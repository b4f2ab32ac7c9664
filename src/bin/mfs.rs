use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mfs::{
    client::MfsClient,
    disk_format::block::{BLOCK_SIZE, EMPTY_BLOCK},
    protocol::EntryKind,
};

#[derive(Parser)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:10000")]
    server: String,
    /// Seconds to wait for a response before resending a request
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the inode number of NAME in the directory PARENT
    Lookup { parent: i32, name: String },
    /// Print the kind, size and block count of an inode
    Stat { inum: i32 },
    /// Write one block of a file from a local file, zero-padded to a full block
    Write {
        inum: i32,
        block: i32,
        input: PathBuf,
    },
    /// Write one block of a file or directory to stdout
    Read { inum: i32, block: i32 },
    /// Create a file or directory called NAME in the directory PARENT
    Create {
        parent: i32,
        kind: Kind,
        name: String,
    },
    /// Remove NAME from the directory PARENT
    Unlink { parent: i32, name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    File,
    Dir,
}

impl From<Kind> for EntryKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::File => EntryKind::File,
            Kind::Dir => EntryKind::Directory,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let client = MfsClient::with_timeout(&args.server, Duration::from_secs(args.timeout))?;

    match args.command {
        Command::Lookup { parent, name } => {
            println!("{}", client.lookup(parent, &CString::new(name)?)?);
        }
        Command::Stat { inum } => {
            let stat = client.stat(inum)?;
            println!("kind: {:?}", stat.kind);
            println!("size: {}", stat.size);
            println!("blocks: {}", stat.blocks);
        }
        Command::Write { inum, block, input } => {
            let contents = fs::read(&input)
                .with_context(|| format!("unable to read {}", input.display()))?;
            ensure!(
                contents.len() <= BLOCK_SIZE,
                "{} is larger than one block",
                input.display()
            );

            let mut data = EMPTY_BLOCK;
            data[..contents.len()].copy_from_slice(&contents);

            client.write(inum, block, &data)?;
        }
        Command::Read { inum, block } => {
            let data = client.read(inum, block)?;
            io::stdout().write_all(&data)?;
        }
        Command::Create { parent, kind, name } => {
            client.create(parent, kind.into(), &CString::new(name)?)?;
        }
        Command::Unlink { parent, name } => {
            client.unlink(parent, &CString::new(name)?)?;
        }
    }

    Ok(())
}
