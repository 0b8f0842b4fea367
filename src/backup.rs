use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::BackupError;

/// `<dir>/<stem>_backup_<yyyy-MM-dd-HH-mm-ss>.csv`, hours on the 24-hour clock so a
/// morning and an evening backup of the same day never share a name.
pub fn backup_path(input: &Path, now: DateTime<Local>) -> Result<PathBuf, BackupError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| BackupError::NoFileName(input.to_path_buf()))?;

    let mut name = stem.to_os_string();
    name.push(format!("_backup_{}.csv", now.format("%Y-%m-%d-%H-%M-%S")));

    Ok(input.with_file_name(name))
}

/// Copies `input` byte for byte next to itself. Never overwrites an existing file.
pub fn create_backup(input: &Path) -> Result<PathBuf, BackupError> {
    let path = backup_path(input, Local::now())?;
    let create = |source| BackupError::Create {
        path: path.clone(),
        source,
    };

    let mut src = File::open(input).map_err(create)?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(create)?;

    io::copy(&mut src, &mut dst).map_err(create)?;
    dst.sync_all().map_err(create)?;

    Ok(path)
}

/// Writes `contents` to a sibling temp file, then renames it over `target`.
pub fn write_atomically(target: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = build_temp_path(target);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(target_os = "windows")]
    {
        use std::io::ErrorKind;
        if let Err(err) = fs::rename(&temp_path, target) {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(target)?;
                fs::rename(&temp_path, target)?;
            } else {
                let _ = fs::remove_file(&temp_path);
                return Err(err);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Err(err) = fs::rename(&temp_path, target) {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }
    }

    Ok(())
}

fn build_temp_path(target: &Path) -> PathBuf {
    let mut temp = target.to_path_buf();
    let suffix = format!("__tmp__pid_{}", std::process::id());
    match temp.file_name() {
        Some(name) => {
            let mut os_string = name.to_os_string();
            os_string.push(suffix);
            temp.set_file_name(os_string);
        }
        None => temp.push(format!("temp{suffix}")),
    }
    temp
}
