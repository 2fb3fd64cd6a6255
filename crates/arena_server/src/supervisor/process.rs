//! Spawning and killing the game server process group.

use crate::error::SupervisorError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Everything needed to launch the process again with the same invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dir: PathBuf,
}

impl ProcessSpec {
    /// Engine invocation for a dedicated server listening on `host:port`
    /// with its home path in `dir`.
    pub fn engine(program: PathBuf, host: &str, port: u16, dir: &Path) -> Self {
        let mut args = Vec::new();
        let mut set = |key: &str, value: &str| {
            args.extend(["+set".to_string(), key.to_string(), value.to_string()]);
        };
        set("dedicated", "2");
        set("sv_master1", "");
        set("sv_master2", "");
        set("sv_master3", "");
        set("net_ip", host);
        set("net_port", &port.to_string());
        set("fs_homepath", &dir.to_string_lossy());
        set("com_basegame", "baseq3");
        set("com_gamename", "Quake3Arena");
        args.extend(["+exec".to_string(), "server.cfg".to_string()]);

        Self {
            program,
            args,
            dir: dir.to_path_buf(),
        }
    }
}

/// Finds `name` on `PATH`, or checks it directly when it contains a path
/// separator.
pub fn resolve_executable(name: &str) -> Result<PathBuf, SupervisorError> {
    let not_found = || SupervisorError::ExecutableNotFound(name.to_string());
    if name.is_empty() {
        return Err(not_found());
    }
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(not_found())
        };
    }
    let paths = std::env::var_os("PATH").ok_or_else(not_found)?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Shared handle to the current process group id, 0 when nothing runs.
/// Lets [`kill_group`] reach the process from outside the control task.
#[derive(Debug, Clone, Default)]
pub struct ProcessGroup(Arc<AtomicU32>);

impl ProcessGroup {
    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            pgid => Some(pgid),
        }
    }

    fn set(&self, pgid: Option<u32>) {
        self.0.store(pgid.unwrap_or(0), Ordering::Release);
    }
}

/// Sends SIGKILL to every process in the group. A group that is already
/// gone is not an error.
pub fn kill_group(group: &ProcessGroup) -> Result<(), SupervisorError> {
    let Some(pgid) = group.get() else {
        return Ok(());
    };
    #[cfg(unix)]
    {
        let Ok(pgid) = libc::pid_t::try_from(pgid) else {
            return Ok(());
        };
        // SAFETY: killpg has no memory safety preconditions.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(SupervisorError::Kill(err));
            }
        }
    }
    Ok(())
}

/// A running game server process in its own process group.
#[derive(Debug)]
pub struct ManagedProcess {
    spec: ProcessSpec,
    child: Child,
    group: ProcessGroup,
    exited: bool,
}

impl ManagedProcess {
    /// Spawns `spec` and publishes its process group id in `group`.
    pub fn spawn(spec: ProcessSpec, group: ProcessGroup) -> Result<Self, SupervisorError> {
        let child = spawn_child(&spec)?;
        group.set(child.id());
        info!(
            "🚀 Started {} (pid {:?})",
            spec.program.display(),
            child.id()
        );
        Ok(Self {
            spec,
            child,
            group,
            exited: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Waits for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus, SupervisorError> {
        let status = self.child.wait().await.map_err(SupervisorError::Kill)?;
        self.exited = true;
        self.group.set(None);
        Ok(status)
    }

    /// Kills the whole process group and reaps the leader.
    pub async fn kill(&mut self) -> Result<(), SupervisorError> {
        if self.exited {
            return Ok(());
        }
        kill_group(&self.group)?;
        let status = self.wait().await?;
        debug!("Process {} stopped: {}", self.spec.program.display(), status);
        Ok(())
    }

    /// Kills the current process (if still running) and launches the same
    /// invocation again.
    pub async fn respawn(&mut self) -> Result<(), SupervisorError> {
        self.kill().await?;
        self.child = spawn_child(&self.spec)?;
        self.exited = false;
        self.group.set(self.child.id());
        info!(
            "🔄 Restarted {} (pid {:?})",
            self.spec.program.display(),
            self.child.id()
        );
        Ok(())
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if !self.exited {
            let _ = kill_group(&self.group);
            self.group.set(None);
        }
    }
}

fn spawn_child(spec: &ProcessSpec) -> Result<Child, SupervisorError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| SupervisorError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })
}
