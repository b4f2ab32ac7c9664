use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use mfs::{mfs::Mfs, server::Server};

#[derive(Parser)]
struct Args {
    /// UDP port to listen on
    port: u16,
    /// Image name; the image is stored in `<IMAGE>.mfsi`
    image: PathBuf,
    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mfs = Mfs::open(&args.image).context("unable to open image")?;
    let mut server = Server::bind((args.bind, args.port), mfs)?;

    server.serve()
}
