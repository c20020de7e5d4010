use std::path::PathBuf;

use anyhow::*;
use log::*;
use structopt::*;

use ziptree::{Archiver, CompressionMethod, Facade, Symlinks};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipdir",
    about = "Zips a file or directory tree into a flat .zip file, one entry per file"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Store files as-is instead of deflating them.
    #[structopt(long)]
    store: bool,

    /// Leave symbolic links out instead of archiving what they point to.
    #[structopt(long)]
    no_follow: bool,

    #[structopt(name("source"))]
    source: PathBuf,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let compression = if args.store {
        CompressionMethod::None
    } else {
        CompressionMethod::Deflate
    };
    let symlinks = if args.no_follow {
        Symlinks::Skip
    } else {
        Symlinks::Follow
    };

    let archiver = Archiver::new()
        .compression(compression)
        .symlinks(symlinks)
        .with_log(Facade);

    let written = archiver
        .zip(&args.source, &args.zip_path)
        .with_context(|| {
            format!(
                "Couldn't zip {} into {}",
                args.source.display(),
                args.zip_path.display()
            )
        })?;
    info!("Wrote {}", written.display());
    Ok(())
}
