//! Host and filesystem helpers.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::words;

/// Read the machine hostname.
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// The full command line of this process, shell-quoted.
pub fn full_command_line() -> String {
    let mut args = std::env::args();
    let cmd = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();
    words::join(&cmd, &rest)
}

/// Home directory, from the platform base dirs with a `$HOME` fallback.
pub fn home_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
        })
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// True when the file carries any execute permission bit.
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Cheap text check: the first KiB contains no NUL byte.
pub fn is_text_file(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 1024];
    let mut handle = file.take(buf.len() as u64);
    match handle.read(&mut buf) {
        Ok(n) => !buf[..n].contains(&0),
        Err(_) => false,
    }
}
