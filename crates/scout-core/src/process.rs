//! # Editor Process Enumeration
//!
//! Finds editor processes running on this machine. Editors are attached to
//! through a debugger agent listening on loopback, so the OS pid is all the
//! discovery engine needs.
//!
//! ## Platform-Specific Behavior
//!
//! - **macOS**: `libproc` (`proc_listallpids` / `proc_name`)
//! - **Linux**: `/proc/[pid]/comm`
//! - **Windows**: one ToolHelp process snapshot per scan
//! - **Other platforms**: no processes are reported
//!
//! A process can exit between being listed and having its name read. Such
//! failures are skipped one process at a time and never fail the scan.

use std::io;

use tracing::{debug, trace};

use crate::types::{AttachTarget, TargetKind};

/// Source of OS processes
///
/// [`SystemProcesses`] reads the real process table; tests and hosts with
/// their own process model can supply another implementation.
pub trait ProcessSource: Send + Sync
{
    /// Pids of every process currently visible.
    ///
    /// ## Errors
    ///
    /// Fails only if the process table itself cannot be read.
    fn pids(&self) -> io::Result<Vec<u32>>;

    /// Name of one process.
    ///
    /// ## Errors
    ///
    /// Fails if the process has exited or cannot be inspected.
    fn name(&self, pid: u32) -> io::Result<String>;

    /// Pid and name of every process whose name can be read.
    ///
    /// ## Errors
    ///
    /// Fails only if the process table itself cannot be read.
    fn processes(&self) -> io::Result<Vec<(u32, String)>>
    {
        Ok(self
            .pids()?
            .into_iter()
            .filter_map(|pid| match self.name(pid) {
                Ok(name) => Some((pid, name)),
                Err(e) => {
                    trace!(pid, error = %e, "skipping process");
                    None
                }
            })
            .collect())
    }
}

/// The real process table of this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessSource for SystemProcesses
{
    #[cfg(target_os = "linux")]
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        let mut pids = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            if let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    #[cfg(target_os = "linux")]
    fn name(&self, pid: u32) -> io::Result<String>
    {
        let comm = std::fs::read_to_string(format!("/proc/{pid}/comm"))?;
        Ok(comm.trim_end_matches('\n').to_string())
    }

    #[cfg(target_os = "macos")]
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        use libproc::libproc::proc_pid::{listpids, ProcType};

        listpids(ProcType::ProcAllPIDS).map_err(io::Error::other)
    }

    #[cfg(target_os = "macos")]
    fn name(&self, pid: u32) -> io::Result<String>
    {
        let pid = i32::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        libproc::libproc::proc_pid::name(pid).map_err(io::Error::other)
    }

    #[cfg(windows)]
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        Ok(toolhelp::processes()?.into_iter().map(|(pid, _)| pid).collect())
    }

    #[cfg(windows)]
    fn name(&self, pid: u32) -> io::Result<String>
    {
        toolhelp::processes()?
            .into_iter()
            .find_map(|(p, name)| (p == pid).then_some(name))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no process {pid}")))
    }

    #[cfg(windows)]
    fn processes(&self) -> io::Result<Vec<(u32, String)>>
    {
        toolhelp::processes()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    fn pids(&self) -> io::Result<Vec<u32>>
    {
        debug!(os = std::env::consts::OS, "process enumeration not implemented for this platform");
        Ok(Vec::new())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    fn name(&self, _pid: u32) -> io::Result<String>
    {
        Err(io::Error::new(io::ErrorKind::Unsupported, "process names not available"))
    }
}

#[cfg(windows)]
#[allow(unsafe_code)] // Required for the ToolHelp snapshot API
mod toolhelp
{
    use std::io;

    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
    };

    struct Snapshot(HANDLE);

    impl Drop for Snapshot
    {
        fn drop(&mut self)
        {
            // SAFETY: the handle came from CreateToolhelp32Snapshot and is closed only here
            if let Err(e) = unsafe { CloseHandle(self.0) } {
                tracing::debug!(error = %e, "failed to close process snapshot");
            }
        }
    }

    /// Pid and executable name of every process in one snapshot.
    pub fn processes() -> io::Result<Vec<(u32, String)>>
    {
        // SAFETY: no pointer arguments
        let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }.map_err(io::Error::other)?;
        let snapshot = Snapshot(handle);

        let mut entry = PROCESSENTRY32W {
            dwSize: u32::try_from(std::mem::size_of::<PROCESSENTRY32W>()).unwrap_or(u32::MAX),
            ..PROCESSENTRY32W::default()
        };
        let mut processes = Vec::new();

        // SAFETY: `entry` is a live PROCESSENTRY32W with `dwSize` set
        let mut next = unsafe { Process32FirstW(snapshot.0, &mut entry) };
        while next.is_ok() {
            let len = entry.szExeFile.iter().position(|&c| c == 0).unwrap_or(entry.szExeFile.len());
            processes.push((entry.th32ProcessID, String::from_utf16_lossy(&entry.szExeFile[..len])));
            // SAFETY: same snapshot and entry as above
            next = unsafe { Process32NextW(snapshot.0, &mut entry) };
        }
        Ok(processes)
    }
}

/// Matches process names against an allow-list of editor names.
#[derive(Debug, Clone)]
pub struct EditorMatcher
{
    names: Vec<String>,
}

impl EditorMatcher
{
    /// Build a matcher for the given process names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
        }
    }

    /// Case-insensitive exact match.
    #[must_use]
    pub fn matches(&self, process_name: &str) -> bool
    {
        let process_name = process_name.to_lowercase();
        self.names.iter().any(|n| *n == process_name)
    }

    /// Display name shown for a matching process.
    #[must_use]
    pub fn display_name(process_name: &str) -> String
    {
        format!("Unity Editor ({process_name})")
    }
}

/// List editor processes as attach targets.
///
/// Returns a fresh, unordered list. Processes whose name cannot be read are
/// skipped; if the process table cannot be read at all the list is empty.
pub fn list_editor_processes(source: &dyn ProcessSource, matcher: &EditorMatcher) -> Vec<AttachTarget>
{
    let processes = match source.processes() {
        Ok(processes) => processes,
        Err(e) => {
            debug!(error = %e, "failed to list processes");
            return Vec::new();
        }
    };

    let editors: Vec<AttachTarget> = processes
        .into_iter()
        .filter(|(_, name)| matcher.matches(name))
        .map(|(pid, name)| AttachTarget::new(pid, EditorMatcher::display_name(&name), TargetKind::Editor))
        .collect();

    debug!(count = editors.len(), "editor process scan finished");
    editors
}
