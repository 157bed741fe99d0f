//! `.bpex` package archives.
//!
//! A `.bpex` file is a gzip-compressed tar stream of a package tree. Packing
//! never follows symbolic links; unpacking rejects entries that would land
//! outside the destination and skips link entries.

use anyhow::{Context, Result, anyhow, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, info};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};

use crate::runtime::{Runtime, unique_sibling};

/// File extension of package archives.
pub const ARCHIVE_EXTENSION: &str = "bpex";

/// Extract `archive_path` into `extract_to`, creating it if needed.
#[tracing::instrument(skip(runtime))]
pub fn unpack<R: Runtime + ?Sized>(runtime: &R, archive_path: &Path, extract_to: &Path) -> Result<()> {
    debug!("Extracting {:?} to {:?}...", archive_path, extract_to);
    let file = runtime
        .open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

    let mut archive = Archive::new(GzDecoder::new(file));
    runtime.create_dir_all(extract_to)?;

    let mut extracted = 0usize;
    for entry in archive.entries().context("Failed to read archive entries")? {
        let mut entry = entry.context("Failed to read archive entry")?;
        let entry_path = entry.path().context("Invalid entry path")?.into_owned();

        let relative = enclosed_path(&entry_path).ok_or_else(|| {
            anyhow!(
                "Archive {:?} contains an unsafe path: {:?}",
                archive_path,
                entry_path
            )
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let full_path = extract_to.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                runtime.create_dir_all(&full_path)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;
                dest.flush()?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && mode & 0o111 != 0
                    && let Err(e) = runtime.set_permissions(&full_path, mode & 0o7777)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
                extracted += 1;
            }
            EntryType::Symlink | EntryType::Link => {
                debug!("Skipping link entry {:?}", entry_path);
            }
            other => {
                debug!("Skipping {:?} entry {:?}", other, entry_path);
            }
        }
    }

    if extracted == 0 {
        bail!("Archive appears to be empty.");
    }

    info!("Extraction complete.");
    Ok(())
}

/// Pack `src_dir` into a `.bpex` archive at `dest`.
///
/// Hidden entries (names starting with `.`), symbolic links and anything
/// listed in `excluded` are left out. Returns the number of files packed.
#[tracing::instrument(skip(runtime, excluded))]
pub fn pack<R: Runtime + ?Sized>(
    runtime: &R,
    src_dir: &Path,
    dest: &Path,
    excluded: &[PathBuf],
) -> Result<usize> {
    if let Some(parent) = dest.parent()
        && !runtime.exists(parent)
    {
        runtime.create_dir_all(parent)?;
    }

    let tmp = unique_sibling(dest, "pack");
    let result = write_archive(runtime, src_dir, &tmp, excluded);

    let files = match result {
        Ok(files) => files,
        Err(e) => {
            let _ = runtime.remove_file(&tmp);
            return Err(e);
        }
    };

    runtime
        .rename(&tmp, dest)
        .with_context(|| format!("Failed to move archive into place at {:?}", dest))?;
    info!("Packed {} file(s) into {:?}", files, dest);
    Ok(files)
}

fn write_archive<R: Runtime + ?Sized>(
    runtime: &R,
    src_dir: &Path,
    archive_path: &Path,
    excluded: &[PathBuf],
) -> Result<usize> {
    let writer = runtime.create_file(archive_path)?;
    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));

    let files = append_dir(runtime, &mut builder, src_dir, Path::new(""), excluded)?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    let mut writer = encoder.finish().context("Failed to finish gzip stream")?;
    writer.flush()?;
    Ok(files)
}

fn append_dir<R: Runtime + ?Sized, W: Write>(
    runtime: &R,
    builder: &mut Builder<W>,
    dir: &Path,
    prefix: &Path,
    excluded: &[PathBuf],
) -> Result<usize> {
    let mut entries = runtime
        .read_dir(dir)
        .with_context(|| format!("Failed to read directory {:?}", dir))?;
    entries.sort();

    let mut files = 0;
    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        if name.to_string_lossy().starts_with('.')
            || excluded.iter().any(|e| e == &path)
            || runtime.is_symlink(&path)
        {
            debug!("Not packing {:?}", path);
            continue;
        }

        let relative = prefix.join(name);
        if runtime.is_dir(&path) {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &relative, std::io::empty())?;
            files += append_dir(runtime, builder, &path, &relative, excluded)?;
        } else {
            let size = runtime.file_len(&path)?;
            // Bounded by the header size in case the file grows meanwhile.
            let reader = runtime.open(&path)?.take(size);

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(size);
            builder
                .append_data(&mut header, &relative, reader)
                .with_context(|| format!("Failed to pack {:?}", path))?;
            files += 1;
        }
    }
    Ok(files)
}

/// Normalize an entry path to a relative path that stays inside the
/// destination, or `None` if it would escape.
fn enclosed_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn create_test_archive(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut tar = Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in files {
            let mut header = Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_unpack_nested_files() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("fmt.bpex");
        let out = dir.path().join("out");
        create_test_archive(
            &archive,
            &[
                ("bplus.toml", "[package]\nname = \"fmt\"\nversion = \"1.0\"\n"),
                ("src/lib.bp", "dhoro x = 1"),
            ],
        );

        unpack(&RealRuntime, &archive, &out).unwrap();

        assert!(out.join("bplus.toml").is_file());
        assert_eq!(
            fs::read_to_string(out.join("src/lib.bp")).unwrap(),
            "dhoro x = 1"
        );
    }

    #[test]
    fn test_unpack_rejects_parent_traversal() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.bpex");
        let out = dir.path().join("out");

        {
            let file = File::create(&archive).unwrap();
            let mut tar = Builder::new(GzEncoder::new(file, Compression::default()));
            let mut header = Header::new_gnu();
            // set_path refuses "..", so write the raw name bytes
            let name = b"../escaped.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_size(4);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            tar.append(&header, &b"evil"[..]).unwrap();
            tar.into_inner().unwrap().finish().unwrap();
        }

        let err = unpack(&RealRuntime, &archive, &out).unwrap_err();
        assert!(err.to_string().contains("unsafe path"));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_unpack_empty_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.bpex");
        create_test_archive(&archive, &[]);

        let err = unpack(&RealRuntime, &archive, &dir.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_unpack_garbage() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("garbage.bpex");
        fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(unpack(&RealRuntime, &archive, &dir.path().join("out")).is_err());
    }

    #[test]
    fn test_pack_streams_file_contents() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let content: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        fs::write(project.join("blob.bin"), &content).unwrap();

        let archive = dir.path().join("blob.bpex");
        assert_eq!(pack(&RealRuntime, &project, &archive, &[]).unwrap(), 1);

        let out = dir.path().join("out");
        unpack(&RealRuntime, &archive, &out).unwrap();
        assert_eq!(fs::read(out.join("blob.bin")).unwrap(), content);
    }

    #[test]
    fn test_pack_then_unpack_tree() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(project.join("src")).unwrap();
        fs::create_dir_all(project.join("target")).unwrap();
        fs::write(project.join("bplus.toml"), "[package]").unwrap();
        fs::write(project.join("src/main.bp"), "dekhao 1").unwrap();
        fs::write(project.join(".bpmconfig"), "{}").unwrap();
        fs::write(project.join("target/old.bpex"), "stale").unwrap();

        let archive = project.join("target/new.bpex");
        let files = pack(
            &RealRuntime,
            &project,
            &archive,
            &[project.join("target")],
        )
        .unwrap();
        assert_eq!(files, 2);

        let out = dir.path().join("out");
        unpack(&RealRuntime, &archive, &out).unwrap();
        assert_eq!(fs::read_to_string(out.join("src/main.bp")).unwrap(), "dekhao 1");
        assert!(out.join("bplus.toml").exists());
        assert!(!out.join(".bpmconfig").exists());
        assert!(!out.join("target").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_pack_skips_symlinks() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink("/etc/hostname", project.join("link.txt")).unwrap();

        let archive = dir.path().join("p.bpex");
        assert_eq!(pack(&RealRuntime, &project, &archive, &[]).unwrap(), 1);

        let out = dir.path().join("out");
        unpack(&RealRuntime, &archive, &out).unwrap();
        assert!(out.join("real.txt").exists());
        assert!(!out.join("link.txt").exists());
    }

    #[test]
    fn test_enclosed_path() {
        assert_eq!(
            enclosed_path(Path::new("./a/b.txt")),
            Some(PathBuf::from("a/b.txt"))
        );
        assert_eq!(enclosed_path(Path::new("a/../../b")), None);
        assert_eq!(enclosed_path(Path::new("/etc/passwd")), None);
    }
}
