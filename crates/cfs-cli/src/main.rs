#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use cfs::{ops, FileInfo, SeekOrigin, VfsError, Volume, VolumeStats, COPY_BUFFER_BYTES};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cfs", about = "CapsuleFS — single-file virtual file system toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh volume image.
    Format {
        /// Path of the image file to create.
        image: PathBuf,
        /// Volume size in bytes (multiple of 4096).
        #[arg(long)]
        size_bytes: u64,
    },
    /// Show volume statistics.
    Info {
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List a directory.
    Ls {
        image: PathBuf,
        /// Directory path inside the volume.
        #[arg(default_value = "\\")]
        path: String,
    },
    /// Create a directory inside the volume.
    Mkdir { image: PathBuf, path: String },
    /// Copy a host file into the volume.
    Import {
        image: PathBuf,
        host_file: PathBuf,
        path: String,
    },
    /// Copy a file out of the volume onto the host.
    Export {
        image: PathBuf,
        path: String,
        host_file: PathBuf,
    },
    /// Delete a file or (recursively) a directory.
    Rm {
        image: PathBuf,
        path: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Find entries matching a wildcard pattern.
    Find {
        image: PathBuf,
        path: String,
        /// Wildcard pattern (`*` and `?`).
        pattern: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Copy a file between two volume images.
    Cp {
        image: PathBuf,
        src: String,
        dest_image: PathBuf,
        dst: String,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InfoOutput {
    stats: VolumeStats,
    root: FileInfo,
}

#[derive(Debug, Serialize)]
struct LsEntry {
    path: String,
    is_directory: bool,
    file_size: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Format { image, size_bytes } => format_volume(&image, size_bytes),
        Command::Info { image, json } => info(&image, json),
        Command::Ls { image, path } => ls(&image, &path),
        Command::Mkdir { image, path } => mkdir(&image, &path),
        Command::Import {
            image,
            host_file,
            path,
        } => import(&image, &host_file, &path),
        Command::Export {
            image,
            path,
            host_file,
        } => export(&image, &path, &host_file),
        Command::Rm {
            image,
            path,
            recursive,
        } => rm(&image, &path, recursive),
        Command::Find {
            image,
            path,
            pattern,
            recursive,
        } => find(&image, &path, &pattern, recursive),
        Command::Cp {
            image,
            src,
            dest_image,
            dst,
        } => cp(&image, &src, &dest_image, &dst),
    }
}

fn mount(image: &PathBuf) -> Result<Volume> {
    Volume::mount_file(image).with_context(|| format!("mounting {}", image.display()))
}

fn format_volume(image: &PathBuf, size_bytes: u64) -> Result<()> {
    let volume = Volume::create_on_file(image, size_bytes)
        .with_context(|| format!("formatting {}", image.display()))?;
    let stats = volume.stats();
    volume.close()?;
    println!(
        "formatted {} ({} blocks, {} free)",
        image.display(),
        stats.total_blocks,
        stats.free_blocks
    );
    Ok(())
}

fn info(image: &PathBuf, json: bool) -> Result<()> {
    let volume = mount(image)?;
    let output = InfoOutput {
        stats: volume.stats(),
        root: volume.file_info("\\")?,
    };
    volume.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let used = output.stats.total_blocks - output.stats.free_blocks;
        println!("volume size : {} bytes", output.stats.volume_size);
        println!("block size  : {} bytes", output.stats.block_size);
        println!(
            "blocks      : {} total, {} used, {} free",
            output.stats.total_blocks, used, output.stats.free_blocks
        );
        println!("groups      : {}", output.stats.group_count);
    }
    Ok(())
}

fn ls(image: &PathBuf, path: &str) -> Result<()> {
    let volume = mount(image)?;
    let mut entries = Vec::new();
    for child in volume.find_files(path, "*", false)? {
        let info = volume.file_info(&child)?;
        entries.push(LsEntry {
            path: child,
            is_directory: info.is_directory,
            file_size: info.file_size,
        });
    }
    volume.close()?;

    for entry in entries {
        if entry.is_directory {
            println!("{:>12}  {}", "<dir>", entry.path);
        } else {
            println!("{:>12}  {}", entry.file_size, entry.path);
        }
    }
    Ok(())
}

fn mkdir(image: &PathBuf, path: &str) -> Result<()> {
    let volume = mount(image)?;
    volume.create_directory(path)?;
    volume.close()?;
    Ok(())
}

fn import(image: &PathBuf, host_file: &PathBuf, path: &str) -> Result<()> {
    let volume = mount(image)?;
    let mut source = File::open(host_file)
        .with_context(|| format!("opening {}", host_file.display()))?;
    let mut target = volume.create_file(path)?;

    let mut buffer = vec![0_u8; COPY_BUFFER_BYTES];
    let mut total = 0_u64;
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        target.write_data(&buffer[..read])?;
        total += read as u64;
    }
    target.close();
    volume.close()?;
    println!("imported {total} bytes into {path}");
    Ok(())
}

fn export(image: &PathBuf, path: &str, host_file: &PathBuf) -> Result<()> {
    let volume = mount(image)?;
    let mut source = volume.open_file(path, false)?;
    source.set_position(0, SeekOrigin::Begin)?;
    let mut target = File::create(host_file)
        .with_context(|| format!("creating {}", host_file.display()))?;

    let mut total = 0_u64;
    loop {
        let chunk = source.read_data(COPY_BUFFER_BYTES)?;
        if chunk.is_empty() {
            break;
        }
        target.write_all(&chunk)?;
        total += chunk.len() as u64;
    }
    source.close();
    volume.close()?;
    println!("exported {total} bytes to {}", host_file.display());
    Ok(())
}

fn rm(image: &PathBuf, path: &str, recursive: bool) -> Result<()> {
    let volume = mount(image)?;
    let info = volume.file_info(path)?;
    if !info.exists {
        volume.close()?;
        bail!("not found: {path}");
    }
    let result = if info.is_directory {
        volume.delete_directory(path, recursive)
    } else {
        volume.delete_file(path)
    };
    match result {
        Ok(()) => {}
        Err(VfsError::NotEmpty(_)) => {
            volume.close()?;
            bail!("directory not empty (use --recursive): {path}");
        }
        Err(err) => {
            volume.close()?;
            return Err(err.into());
        }
    }
    volume.close()?;
    Ok(())
}

fn find(image: &PathBuf, path: &str, pattern: &str, recursive: bool) -> Result<()> {
    let volume = mount(image)?;
    let hits: Vec<String> = volume.find_files(path, pattern, recursive)?.collect();
    volume.close()?;
    for hit in hits {
        println!("{hit}");
    }
    Ok(())
}

fn cp(image: &PathBuf, src: &str, dest_image: &PathBuf, dst: &str) -> Result<()> {
    let source = mount(image)?;
    let same_image = image == dest_image;
    let destination = if same_image {
        source.clone()
    } else {
        mount(dest_image)?
    };

    ops::copy_file(&source, src, &destination, dst)?;

    if !same_image {
        destination.close()?;
    }
    source.close()?;
    Ok(())
}
