use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

/// The corpus file is rebuilt by `import` and stays out of backups.
const BACKUP_FILES: &[&str] = &["collections.json", "favorites.json", "config.yaml"];

/// Write target for backup: either a file path or stdout (when piped).
enum BackupTarget {
    File(PathBuf),
    Stdout,
}

pub fn create_backup(output_path: Option<PathBuf>, base_path: &Path) -> Result<()> {
    let target = match output_path {
        Some(p) => BackupTarget::File(p),
        None if !io::stdout().is_terminal() => BackupTarget::Stdout,
        None => {
            let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
            BackupTarget::File(PathBuf::from(format!("fovea-backup-{timestamp}.tar.gz")))
        }
    };

    // Use stderr for progress when writing to stdout
    let piped = matches!(target, BackupTarget::Stdout);

    let writer: Box<dyn Write> = match &target {
        BackupTarget::File(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create archive at {}", path.display()))?;
            Box::new(file)
        }
        BackupTarget::Stdout => Box::new(io::stdout().lock()),
    };

    let encoder = GzEncoder::new(writer, Compression::default());
    let mut archive = Builder::new(encoder);

    let mut included_count = 0;

    for filename in BACKUP_FILES {
        let file_path = base_path.join(filename);
        if file_path.exists() {
            archive
                .append_path_with_name(&file_path, filename)
                .with_context(|| format!("Failed to add {filename} to archive"))?;
            log_progress(piped, &format!("  + {filename}"));
            included_count += 1;
        }
    }

    if included_count == 0 {
        anyhow::bail!("No files found to backup in {}", base_path.display());
    }

    let encoder = archive
        .into_inner()
        .context("Failed to finalize tar archive")?;
    encoder.finish().context("Failed to finalize gzip stream")?;

    if let BackupTarget::File(path) = &target {
        let metadata = std::fs::metadata(path)?;
        let size_kb = metadata.len() / 1024;
        log_progress(
            piped,
            &format!("\nBackup created: {} ({} KB)", path.display(), size_kb),
        );
    }

    Ok(())
}

/// Print progress to stdout normally, or stderr when piped.
fn log_progress(piped: bool, msg: &str) {
    if piped {
        eprintln!("{msg}");
    } else {
        println!("{msg}");
    }
}

pub fn restore_backup(archive_path: &Path, skip_confirm: bool, base_path: &Path) -> Result<()> {
    // Open and validate archive
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive at {}", archive_path.display()))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    // First pass: validate archive contains expected files
    let entries = archive.entries().context("Failed to read archive entries")?;

    let mut valid_entries: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read archive entry")?;
        let entry_path = entry.path().context("Failed to get entry path")?;
        let entry_str = entry_path.to_string_lossy().to_string();

        if is_whitelisted(&entry_str) {
            valid_entries.push(entry_str);
        }
    }

    if valid_entries.is_empty() {
        anyhow::bail!(
            "Archive does not contain any recognized backup files.\n\
             Expected: {BACKUP_FILES:?}"
        );
    }

    println!("Found {} files to restore:", valid_entries.len());
    for entry in &valid_entries {
        println!("  {entry}");
    }
    println!("\nDestination: {}", base_path.display());

    // Confirm unless --yes
    if !skip_confirm {
        println!("\nThis will overwrite existing files. Continue? [y/N] ");
        let stdin = std::io::stdin();
        let mut line = String::new();
        BufReader::new(stdin.lock())
            .read_line(&mut line)
            .context("Failed to read user input")?;

        let response = line.trim().to_lowercase();
        if response != "y" && response != "yes" {
            println!("Restore cancelled.");
            return Ok(());
        }
    }

    // Second pass: extract whitelisted entries
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    let mut restored_count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_string_lossy().to_string();

        if !is_whitelisted(&entry_path) {
            continue;
        }

        let dest_path = base_path.join(&entry_path);

        // Ensure parent directory exists
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        entry
            .unpack(&dest_path)
            .with_context(|| format!("Failed to extract {entry_path}"))?;

        println!("  + {entry_path}");
        restored_count += 1;
    }

    println!("\nRestored {restored_count} files to {}", base_path.display());

    Ok(())
}

fn is_whitelisted(path: &str) -> bool {
    BACKUP_FILES.contains(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_stores(dir: &Path) {
        std::fs::write(dir.join("collections.json"), r#"{"default":{}}"#).unwrap();
        std::fs::write(dir.join("favorites.json"), r#"{"default":[]}"#).unwrap();
        std::fs::write(dir.join("config.yaml"), "default_top_k: 9\n").unwrap();
        std::fs::write(dir.join("corpus.bin"), b"\x01binary").unwrap();
    }

    /// Build a tar.gz holding the given name/content pairs.
    fn make_archive(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let archive_path = dir.join("made.tar.gz");
        let encoder = GzEncoder::new(
            File::create(&archive_path).unwrap(),
            Compression::default(),
        );
        let mut builder = Builder::new(encoder);
        for (name, content) in entries {
            let source = dir.join(name);
            std::fs::write(&source, content).unwrap();
            builder.append_path_with_name(&source, name).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    fn archive_entries(archive_path: &Path) -> Vec<String> {
        let mut archive = Archive::new(GzDecoder::new(File::open(archive_path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_whitelist_covers_store_files_only() {
        for name in BACKUP_FILES {
            assert!(is_whitelisted(name));
        }
        assert!(!is_whitelisted("corpus.bin"));
        assert!(!is_whitelisted("collections.json.bak"));
        assert!(!is_whitelisted("../etc/passwd"));
    }

    #[test]
    fn test_backup_carries_stores_but_not_corpus() {
        let base = TempDir::new().unwrap();
        write_stores(base.path());

        let out = TempDir::new().unwrap();
        let archive_path = out.path().join("snap.tar.gz");
        create_backup(Some(archive_path.clone()), base.path()).unwrap();

        let mut entries = archive_entries(&archive_path);
        entries.sort();
        assert_eq!(
            entries,
            vec!["collections.json", "config.yaml", "favorites.json"]
        );
    }

    #[test]
    fn test_backup_empty_dir_errors() {
        let base = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();

        let result = create_backup(Some(out.path().join("empty.tar.gz")), base.path());
        assert!(result.unwrap_err().to_string().contains("No files found"));
    }

    #[test]
    fn test_restore_overwrites_existing_stores() {
        let source = TempDir::new().unwrap();
        write_stores(source.path());
        let out = TempDir::new().unwrap();
        let archive_path = out.path().join("snap.tar.gz");
        create_backup(Some(archive_path.clone()), source.path()).unwrap();

        // Target already has diverged stores and its own corpus.
        let target = TempDir::new().unwrap();
        std::fs::write(target.path().join("collections.json"), "{\"other\":{}}").unwrap();
        std::fs::write(target.path().join("corpus.bin"), b"local").unwrap();

        restore_backup(&archive_path, true, target.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(target.path().join("collections.json")).unwrap(),
            r#"{"default":{}}"#
        );
        assert_eq!(
            std::fs::read_to_string(target.path().join("config.yaml")).unwrap(),
            "default_top_k: 9\n"
        );
        // The local corpus survives untouched.
        assert_eq!(
            std::fs::read(target.path().join("corpus.bin")).unwrap(),
            b"local"
        );
    }

    #[test]
    fn test_restore_refuses_foreign_archive() {
        let tmp = TempDir::new().unwrap();
        let archive_path = make_archive(tmp.path(), &[("evil.sh", "#!/bin/bash")]);

        let target = TempDir::new().unwrap();
        let result = restore_backup(&archive_path, true, target.path());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("does not contain any recognized"));
    }

    #[test]
    fn test_restore_filters_unknown_entries() {
        let tmp = TempDir::new().unwrap();
        let archive_path = make_archive(
            tmp.path(),
            &[("favorites.json", "{}"), ("malware.exe", "bad")],
        );

        let target = TempDir::new().unwrap();
        restore_backup(&archive_path, true, target.path()).unwrap();

        assert!(target.path().join("favorites.json").exists());
        assert!(!target.path().join("malware.exe").exists());
    }
}
