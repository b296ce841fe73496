//! Identify the process holding a file open.
//!
//! On Linux this scans `/proc/*/fd` for descriptors pointing at the blocked
//! path (or anything under it, for directories) and reports the first owner
//! by its `/proc/{pid}/comm` name. Other platforms return `None`.

use std::path::Path;

/// A process found holding a handle on a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingProcess {
    pub pid: u32,
    pub name: String,
}

/// Best-effort lookup of the process blocking `path`.
pub fn find_blocking_process(path: &Path) -> Option<BlockingProcess> {
    let target = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    scan_proc(|_pid, proc_dir| {
        let fd_dir = proc_dir.join("fd");
        let entries = std::fs::read_dir(&fd_dir).ok()?;
        entries
            .flatten()
            .filter_map(|fd| std::fs::read_link(fd.path()).ok())
            .find(|link| link.starts_with(&target))
            .map(|_| ())
    })
}

/// Best-effort lookup of a running process whose executable is `exe`.
pub fn find_process_by_exe(exe: &Path) -> Option<BlockingProcess> {
    let target = exe.canonicalize().unwrap_or_else(|_| exe.to_path_buf());
    scan_proc(|_pid, proc_dir| {
        let link = std::fs::read_link(proc_dir.join("exe")).ok()?;
        (link == target).then_some(())
    })
}

#[cfg(target_os = "linux")]
fn scan_proc(matches: impl Fn(u32, &Path) -> Option<()>) -> Option<BlockingProcess> {
    let own_pid = std::process::id();
    let proc_entries = std::fs::read_dir("/proc").ok()?;

    for entry in proc_entries.flatten() {
        let pid_str = entry.file_name();
        let pid_str = pid_str.to_string_lossy();
        let Ok(pid) = pid_str.parse::<u32>() else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let proc_dir = entry.path();
        if matches(pid, &proc_dir).is_none() {
            continue;
        }

        let name = std::fs::read_to_string(proc_dir.join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        return Some(BlockingProcess { pid, name });
    }

    None
}

#[cfg(not(target_os = "linux"))]
fn scan_proc(_matches: impl Fn(u32, &Path) -> Option<()>) -> Option<BlockingProcess> {
    None
}
