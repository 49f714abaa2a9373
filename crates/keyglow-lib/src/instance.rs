//! Single-instance and privilege checks run before anything starts.

use std::path::Path;

/// PID of another live daemon recorded at `pid_path`, if any.
///
/// Missing or unreadable files, non-positive PIDs, our own PID and dead
/// processes all count as "not running".
pub fn check_running(pid_path: &Path) -> Option<i32> {
    let pid = read_pid(pid_path)?;
    if pid <= 0 || pid as u32 == std::process::id() {
        return None;
    }
    process_alive(pid).then_some(pid)
}

fn read_pid(pid_path: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_path)
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Whether `pid` names a process we could signal.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Running with root privileges.
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid_file(contents: &str) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), contents).unwrap();
        f
    }

    #[test]
    fn missing_file_is_not_running() {
        assert_eq!(check_running(Path::new("/nonexistent/keyglow0/pid")), None);
    }

    #[test]
    fn garbage_is_not_running() {
        let f = pid_file("not a pid\n");
        assert_eq!(check_running(f.path()), None);
    }

    #[test]
    fn non_positive_pid_is_not_running() {
        assert_eq!(check_running(pid_file("0\n").path()), None);
        assert_eq!(check_running(pid_file("-1\n").path()), None);
    }

    #[test]
    fn own_pid_is_not_another_instance() {
        let f = pid_file(&format!("{}\n", std::process::id()));
        assert_eq!(check_running(f.path()), None);
    }

    #[test]
    fn live_child_is_detected() {
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id() as i32;
        let f = pid_file(&format!("{pid}\n"));
        let found = check_running(f.path());
        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(found, Some(pid));
    }

    #[test]
    fn reaped_child_is_not_running() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }
}
