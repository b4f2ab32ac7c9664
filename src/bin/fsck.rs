use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mfs::{mfs::Mfs, storage::FileBackedStorage};

#[derive(Parser)]
struct Args {
    /// Image name; the image is read from `<IMAGE>.mfsi`
    image: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let storage = FileBackedStorage::open_existing(&args.image)?;
    let mfs = Mfs::load(storage).context("unable to load image")?;

    mfs.check_filesystem()?;
    println!("{}: clean", args.image.display());

    Ok(())
}
