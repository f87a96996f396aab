//! Formats a sectorfs image file, optionally copying host files into the
//! root directory.
//!
//! ```text
//! mkfs IMAGE SECTORS [FILE...]
//! ```

use std::{env, fs, path::Path, process};

use anyhow::{Context as _, Result, bail, ensure};
use sectorfs::{FileDisk, FileSys, Params};

fn main() -> Result<()> {
    let args = env::args().collect::<Vec<String>>();
    if args.len() < 3 {
        eprintln!("Usage: {} IMAGE SECTORS [FILE...]", args[0]);
        process::exit(1);
    }

    let image = &args[1];
    let sectors: u32 = args[2]
        .parse()
        .with_context(|| format!("bad sector count {:?}", args[2]))?;
    let contents = &args[3..];

    let disk = FileDisk::create(image, sectors)
        .with_context(|| format!("creating image {image:?}"))?;
    let fs = FileSys::format(disk, Params::default())?;

    for name in contents {
        copy_in(&fs, name).with_context(|| format!("copying {name:?}"))?;
    }

    let free = fs.free_sectors();
    fs.close();
    println!("{image}: {sectors} sectors, {free} free");
    Ok(())
}

fn copy_in(fs: &FileSys<FileDisk>, name: &str) -> Result<()> {
    let data = fs::read(name)?;
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .context("unusable file name")?;

    fs.create(&format!("/{base}"), 0)?;
    let file = fs.open(&format!("/{base}"))?;
    let written = file.write_at(&data, 0);
    ensure!(written == data.len(), "short write: {written}/{}", data.len());
    if file.len() != data.len() {
        bail!("length mismatch after copy");
    }
    Ok(())
}
