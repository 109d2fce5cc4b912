use std::fs;
use std::io;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use tempfile::Builder;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::domain::ArchiveFormat;
use crate::error::ManifestError;

fn fs_err(err: impl ToString) -> ManifestError {
    ManifestError::Filesystem(err.to_string())
}

pub fn ensure_parent(path: &Path) -> Result<(), ManifestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| fs_err(format!("create {}: {err}", parent.display())))?;
    }
    Ok(())
}

/// Expands `archive` into `target_dir`. The contents are unpacked next to the
/// target and renamed into place once complete.
pub fn extract_archive(
    format: ArchiveFormat,
    archive: &Path,
    target_dir: &Path,
) -> Result<(), ManifestError> {
    ensure_parent(target_dir)?;
    let parent = target_dir
        .parent()
        .ok_or_else(|| fs_err("invalid extraction path"))?;
    let staging = Builder::new()
        .prefix(".kira-dm-extract")
        .tempdir_in(parent)
        .map_err(fs_err)?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive, staging.path())?,
        ArchiveFormat::Tar => {
            let file = open(archive)?;
            Archive::new(file).unpack(staging.path()).map_err(fs_err)?;
        }
        ArchiveFormat::TarGz => {
            let file = open(archive)?;
            Archive::new(GzDecoder::new(file))
                .unpack(staging.path())
                .map_err(fs_err)?;
        }
    }

    // On failure `staging` is still owned here and removed on drop.
    atomic_rename(staging.path(), target_dir)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), ManifestError> {
    let file = open(zip_path)?;
    let mut archive = ZipArchive::new(file).map_err(fs_err)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(fs_err)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(fs_err("zip entry path traversal detected")),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(fs_err)?;
            continue;
        }

        ensure_parent(&entry_path)?;
        let mut outfile = fs::File::create(&entry_path).map_err(fs_err)?;
        io::copy(&mut entry, &mut outfile).map_err(fs_err)?;
    }
    Ok(())
}

/// Copies a file or directory tree to `dest` through a staging location in
/// the destination's parent.
pub fn copy_atomic(source: &Path, dest: &Path) -> Result<(), ManifestError> {
    ensure_parent(dest)?;
    let parent = dest.parent().ok_or_else(|| fs_err("invalid destination path"))?;
    let staging = Builder::new()
        .prefix(".kira-dm-copy")
        .tempdir_in(parent)
        .map_err(fs_err)?;
    let staged = staging.path().join("content");

    if source.is_dir() {
        copy_dir_recursive(source, &staged)?;
    } else {
        fs::copy(source, &staged)
            .map_err(|err| fs_err(format!("copy {}: {err}", source.display())))?;
    }
    fs::rename(&staged, dest).map_err(fs_err)?;
    Ok(())
}

pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), ManifestError> {
    fs::create_dir_all(dest).map_err(fs_err)?;
    for item in WalkDir::new(source).follow_links(true).min_depth(1) {
        let item = item.map_err(fs_err)?;
        let relative = item.path().strip_prefix(source).map_err(fs_err)?;
        let target = dest.join(relative);
        if item.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(fs_err)?;
        } else {
            ensure_parent(&target)?;
            fs::copy(item.path(), &target).map_err(fs_err)?;
        }
    }
    Ok(())
}

pub fn atomic_rename(from: &Path, to: &Path) -> Result<(), ManifestError> {
    if to.is_dir() {
        fs::remove_dir_all(to).map_err(fs_err)?;
    } else if to.exists() {
        fs::remove_file(to).map_err(fs_err)?;
    }
    fs::rename(from, to).map_err(fs_err)
}

fn open(path: &Path) -> Result<fs::File, ManifestError> {
    fs::File::open(path).map_err(|err| fs_err(format!("open {}: {err}", path.display())))
}
