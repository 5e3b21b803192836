//! Command-line front end over a microfs disk image.
//!
//! Every subcommand maps to one engine operation; mutating subcommands sync
//! the image before reporting success. Logical filesystem failures exit
//! with code 1, image-access failures with code 2.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use microfs::{
    BlockStorage, EntryKind, FileBlockDevice, FileBlockDeviceBuilder, MfsError, MFS, NUM_BLOCKS,
};

#[derive(Parser)]
#[command(name = "microfs")]
#[command(about = "Operate on a 1 MiB microfs disk image")]
struct Cli {
    /// Path to the backing disk image
    #[arg(short, long, default_value = "fs.img")]
    image: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh image holding an empty root directory
    Init,
    /// Print the root directory and the raw free bitmap
    Check,
    /// Create an empty file
    Creat { path: String },
    /// Create a directory, including any missing ancestors
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// List a directory's entries
    Ls { path: String },
    /// Write a file's content to stdout
    Read { path: String },
    /// Import an external file's bytes as the file's new content
    Write { path: String, source: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(MfsError::Io(err)) => {
            eprintln!("error: image {}: {}", cli.image.display(), err);
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<(), MfsError> {
    if matches!(cli.command, Command::Init) {
        return init_image(&cli.image);
    }

    let dev = FileBlockDevice::open_disk(&cli.image, NUM_BLOCKS)?;
    let mut fs = MFS::open(dev)?;

    match &cli.command {
        Command::Init => unreachable!("handled before opening"),
        Command::Check => check_image(&mut fs)?,
        Command::Creat { path } => {
            fs.create_file(path)?;
            fs.sync()?;
            println!("created file {}", path);
        }
        Command::Mkdir { path } => {
            fs.create_dir(path)?;
            fs.sync()?;
            println!("created directory {}", path);
        }
        Command::Rm { path } => {
            fs.remove_file(path)?;
            fs.sync()?;
            println!("removed file {}", path);
        }
        Command::Rmdir { path } => {
            fs.remove_dir(path)?;
            fs.sync()?;
            println!("removed directory {}", path);
        }
        Command::Ls { path } => {
            for (name, kind) in fs.list_dir(path)? {
                let tag = match kind {
                    EntryKind::Directory => 'd',
                    EntryKind::File => 'f',
                    EntryKind::Unknown => '?',
                };
                println!("{} {}", tag, name);
            }
        }
        Command::Read { path } => {
            let content = fs.read_file(path)?;
            std::io::stdout().write_all(&content).map_err(MfsError::Io)?;
        }
        Command::Write { path, source } => {
            let content = std::fs::read(source)?;
            fs.write_file(path, &content)?;
            fs.sync()?;
            println!("wrote {} bytes to {}", content.len(), path);
        }
    }
    Ok(())
}

fn init_image(image: &Path) -> Result<(), MfsError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    let dev = FileBlockDeviceBuilder::from(file)
        .with_block_count(NUM_BLOCKS)
        .build()?;
    MFS::format(dev)?;
    println!("initialized image {}", image.display());
    Ok(())
}

fn check_image(fs: &mut MFS<FileBlockDevice>) -> Result<(), MfsError> {
    let root = fs.root()?;
    println!("root directory:");
    println!("  kind: {}", root.kind);
    println!("  name: {}", root.name());
    println!("  size: {}", root.size);
    for (i, entry) in root.entries().iter().enumerate() {
        println!("  entry {}: block {} name {}", i, entry.block_id, entry.name());
    }

    println!("bitmap (1 = free):");
    for (i, byte) in fs.bitmap_bits().iter().enumerate() {
        print!("{:08b}", byte);
        if (i + 1) % 8 == 0 {
            println!();
        } else {
            print!(" ");
        }
    }
    Ok(())
}
