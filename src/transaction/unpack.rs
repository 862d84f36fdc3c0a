// src/transaction/unpack.rs

//! Staging artifacts into directories
//!
//! The installer hands each verified artifact to an [`ArtifactUnpacker`],
//! which materializes its contents in a fresh directory under the
//! transaction's scratch area.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;
use tracing::debug;

/// gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Materialize an artifact inside `dest`
pub trait ArtifactUnpacker: Send + Sync {
    /// `dest` exists and is empty when called
    fn unpack(&self, artifact: &Path, dest: &Path) -> Result<()>;
}

/// Unpacks `.tar.gz` (or plain `.tar`) artifacts
#[derive(Debug, Default, Clone, Copy)]
pub struct TarballUnpacker;

impl TarballUnpacker {
    fn open(artifact: &Path) -> Result<Archive<Box<dyn Read>>> {
        let mut file = File::open(artifact)?;
        let mut magic = [0u8; 2];
        let is_gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;

        let file = File::open(artifact)?;
        let reader: Box<dyn Read> = if is_gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Archive::new(reader))
    }
}

/// Entry paths must stay inside the destination
fn check_entry_path(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Unpack(format!(
                    "archive entry escapes package directory: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

impl ArtifactUnpacker for TarballUnpacker {
    fn unpack(&self, artifact: &Path, dest: &Path) -> Result<()> {
        let mut archive = Self::open(artifact)?;
        let mut count = 0usize;

        let entries = archive
            .entries()
            .map_err(|e| Error::Unpack(format!("Failed to read archive entries: {}", e)))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::Unpack(format!("Failed to read archive entry: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| Error::Unpack(format!("Failed to get entry path: {}", e)))?
                .into_owned();
            check_entry_path(&path)?;

            let entry_type = entry.header().entry_type();
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                return Err(Error::Unpack(format!(
                    "links are not allowed in package archives: {}",
                    path.display()
                )));
            }

            entry
                .unpack_in(dest)
                .map_err(|e| Error::Unpack(format!("Failed to unpack {}: {}", path.display(), e)))?;
            count += 1;
        }

        debug!("Unpacked {} entries into {}", count, dest.display());
        Ok(())
    }
}

/// Stores the artifact unchanged as a single file
#[derive(Debug, Clone)]
pub struct CopyUnpacker {
    file_name: String,
}

impl CopyUnpacker {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl Default for CopyUnpacker {
    fn default() -> Self {
        Self::new("artifact")
    }
}

impl ArtifactUnpacker for CopyUnpacker {
    fn unpack(&self, artifact: &Path, dest: &Path) -> Result<()> {
        let target = dest.join(&self.file_name);
        io::copy(&mut File::open(artifact)?, &mut File::create(&target)?)?;
        Ok(())
    }
}

/// Move a directory into place, copying when `src` and `dst` are on
/// different filesystems
pub(crate) fn move_dir(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Cross-filesystem move detected ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );
            copy_dir(src, dst)?;
            fs::remove_dir_all(src)
        }
        Err(e) => Err(e),
    }
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            File::open(&target)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;

    fn write_tarball(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_unpack_tarball() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("app.tar.gz");
        write_tarball(&artifact, &[("bin/app", b"#!/bin/sh\n"), ("README", b"hello")]);

        let dest = temp_dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        TarballUnpacker.unpack(&artifact, &dest).unwrap();

        assert_eq!(fs::read(dest.join("README")).unwrap(), b"hello");
        assert!(dest.join("bin/app").is_file());
    }

    #[test]
    fn test_garbage_is_unpack_error() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("bad.tar.gz");
        fs::write(&artifact, [0x1f, 0x8b, 0, 1, 2, 3]).unwrap();

        let dest = temp_dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        assert!(TarballUnpacker.unpack(&artifact, &dest).is_err());
    }

    #[test]
    fn test_entry_path_checks() {
        assert!(check_entry_path(Path::new("bin/app")).is_ok());
        assert!(check_entry_path(Path::new("./share/doc")).is_ok());
        assert!(check_entry_path(Path::new("../etc/passwd")).is_err());
        assert!(check_entry_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_copy_unpacker() {
        let temp_dir = TempDir::new().unwrap();
        let artifact = temp_dir.path().join("blob");
        fs::write(&artifact, b"payload").unwrap();

        let dest = temp_dir.path().join("out");
        fs::create_dir(&dest).unwrap();
        CopyUnpacker::default().unpack(&artifact, &dest).unwrap();
        assert_eq!(fs::read(dest.join("artifact")).unwrap(), b"payload");
    }

    #[test]
    fn test_move_dir() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/file"), b"x").unwrap();

        let dst = temp_dir.path().join("dst");
        move_dir(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dst.join("nested/file")).unwrap(), b"x");
    }
}
