//! Device nodes: one directory per slot under the configured base path.
//!
//! Slot `N` lives at `<base>N/` and holds a `cmd` FIFO that clients write
//! commands into, plus small description files. The root controller's
//! directory also carries the daemon's PID file.

use std::ffi::CString;
use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::command::CommandChannel;
use crate::device::DeviceInfo;
use crate::error::Result;

const DIR_MODE: u32 = 0o755;
const FIFO_MODE: u32 = 0o660;
const FILE_MODE: u32 = 0o644;

/// Creates and removes the per-slot device directories.
#[derive(Debug, Clone)]
pub struct DevNodes {
    base: String,
    gid: Option<u32>,
}

impl DevNodes {
    /// `base` is a prefix, not a directory: slot 1 of `/dev/input/keyglow`
    /// is `/dev/input/keyglow1`.
    pub fn new(base: impl Into<String>, gid: Option<u32>) -> Self {
        DevNodes {
            base: base.into(),
            gid,
        }
    }

    pub fn dir(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}{index}", self.base))
    }

    pub fn cmd_path(&self, index: usize) -> PathBuf {
        self.dir(index).join("cmd")
    }

    /// `<base>0/pid`
    pub fn pid_path(&self) -> PathBuf {
        self.dir(0).join("pid")
    }

    /// Create the slot directory and its command FIFO, returning the open
    /// (non-blocking) read side.
    pub fn create(&self, index: usize) -> Result<CommandChannel> {
        let dir = self.dir(index);
        fs::create_dir_all(&dir)?;
        fs::set_permissions(&dir, Permissions::from_mode(DIR_MODE))?;
        self.chgrp(&dir)?;

        let cmd = self.cmd_path(index);
        make_fifo(&cmd)?;
        fs::set_permissions(&cmd, Permissions::from_mode(FIFO_MODE))?;
        self.chgrp(&cmd)?;

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&cmd)?;
        log::debug!("[devnode] {} ready", dir.display());
        Ok(CommandChannel::new(Box::new(file)).with_path(cmd))
    }

    /// Write `model`, `serial` and `fwversion` files for an attached keyboard.
    pub fn describe(&self, index: usize, info: &DeviceInfo) -> Result<()> {
        let dir = self.dir(index);
        let files = [
            ("model", info.model_name()),
            ("serial", info.serial.clone().unwrap_or_default()),
            ("fwversion", format!("{:04x}", info.firmware_version)),
        ];
        for (name, contents) in files {
            let path = dir.join(name);
            fs::write(&path, format!("{contents}\n"))?;
            fs::set_permissions(&path, Permissions::from_mode(FILE_MODE))?;
            self.chgrp(&path)?;
        }
        Ok(())
    }

    /// Remove the slot directory. A missing directory is not an error.
    pub fn remove(&self, index: usize) {
        let dir = self.dir(index);
        match fs::remove_dir_all(&dir) {
            Ok(()) => log::debug!("[devnode] removed {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[devnode] could not remove {}: {e}", dir.display()),
        }
    }

    /// Record this process in the PID file.
    pub fn write_pid(&self) -> Result<()> {
        let path = self.pid_path();
        fs::write(&path, format!("{}\n", std::process::id()))?;
        fs::set_permissions(&path, Permissions::from_mode(FILE_MODE))?;
        Ok(())
    }

    fn chgrp(&self, path: &Path) -> Result<()> {
        if let Some(gid) = self.gid {
            std::os::unix::fs::chown(path, None, Some(gid))?;
        }
        Ok(())
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE as libc::mode_t) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::AlreadyExists {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::FileTypeExt;

    fn nodes(dir: &tempfile::TempDir) -> DevNodes {
        DevNodes::new(dir.path().join("keyglow").to_string_lossy(), None)
    }

    #[test]
    fn paths_append_index_to_base() {
        let n = DevNodes::new("/dev/input/keyglow", None);
        assert_eq!(n.dir(3), PathBuf::from("/dev/input/keyglow3"));
        assert_eq!(n.cmd_path(3), PathBuf::from("/dev/input/keyglow3/cmd"));
        assert_eq!(n.pid_path(), PathBuf::from("/dev/input/keyglow0/pid"));
    }

    #[test]
    fn create_makes_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        let ch = n.create(1).unwrap();
        let meta = fs::metadata(n.cmd_path(1)).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, FIFO_MODE);
        assert_eq!(ch.path(), Some(n.cmd_path(1).as_path()));
    }

    #[test]
    fn create_twice_reuses_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        drop(n.create(2).unwrap());
        assert!(n.create(2).is_ok());
    }

    #[test]
    fn written_lines_reach_channel() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        let mut ch = n.create(1).unwrap();
        assert!(ch.poll_lines().is_empty(), "no writer yet");

        let mut writer = OpenOptions::new().write(true).open(n.cmd_path(1)).unwrap();
        writer.write_all(b"rgb ff0000\nbindoff\n").unwrap();
        assert_eq!(ch.poll_lines(), vec!["rgb ff0000", "bindoff"]);
    }

    #[test]
    fn describe_writes_info_files() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        drop(n.create(1).unwrap());
        let info = DeviceInfo {
            path: "usb:001/002".into(),
            product_id: 0x1b13,
            serial: Some("SER1".into()),
            firmware_version: 0x0120,
            led_count: 144,
        };
        n.describe(1, &info).unwrap();
        let read = |f: &str| fs::read_to_string(n.dir(1).join(f)).unwrap();
        assert_eq!(read("model"), "K70 RGB\n");
        assert_eq!(read("serial"), "SER1\n");
        assert_eq!(read("fwversion"), "0120\n");
    }

    #[test]
    fn remove_deletes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        drop(n.create(4).unwrap());
        n.remove(4);
        assert!(!n.dir(4).exists());
        n.remove(4);
    }

    #[test]
    fn pid_file_holds_own_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let n = nodes(&tmp);
        drop(n.create(0).unwrap());
        n.write_pid().unwrap();
        let contents = fs::read_to_string(n.pid_path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
