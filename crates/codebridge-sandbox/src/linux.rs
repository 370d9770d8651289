//! Linux isolation through bubblewrap.
//!
//! The run sees a read-only system root, its session workspace at
//! `/workspace`, the user's skills at `/skills` and the bridge socket. All
//! namespaces are unshared (no network), capabilities are dropped and the
//! seccomp filter from [`crate::seccomp`] is installed before exec.

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::backend::{Invocation, IsolationView, PreparedCommand, RunPlan, SandboxBackend};
use crate::seccomp;
use crate::SandboxError;

pub const SANDBOX_WORKSPACE: &str = "/workspace";
pub const SANDBOX_SKILLS: &str = "/skills";
pub const SANDBOX_BRIDGE_SOCKET: &str = "/run/codebridge/bridge.sock";

/// System directories mounted read-only when present on the host.
const SYSTEM_DIRS: &[&str] = &["/usr", "/lib", "/lib64", "/bin", "/sbin"];

/// Hidden (tmpfs) inside the skills mount even if the user created them.
const MANDATORY_DENY_DIRECTORIES: &[&str] = &[".ssh", ".gnupg", ".aws", ".git/hooks"];

/// Unprivileged uid/gid the code runs as inside the user namespace.
const NOBODY: &str = "65534";

#[derive(Debug, Clone)]
pub struct BwrapBackend {
    bwrap: PathBuf,
}

impl BwrapBackend {
    pub fn new(bwrap: impl Into<PathBuf>) -> Self {
        Self {
            bwrap: bwrap.into(),
        }
    }

    /// Locate `bwrap` on PATH.
    pub fn detect() -> Option<Self> {
        which::which("bwrap").ok().map(Self::new)
    }

    pub fn bwrap_path(&self) -> &Path {
        &self.bwrap
    }
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn mount_system_dirs(cmd: &mut Command) {
    for dir in SYSTEM_DIRS {
        let path = Path::new(dir);
        match std::fs::symlink_metadata(path) {
            // merged-/usr hosts: /bin -> usr/bin
            Ok(meta) if meta.file_type().is_symlink() => {
                if let Ok(target) = std::fs::read_link(path) {
                    cmd.arg("--symlink").arg(target).arg(dir);
                }
            }
            Ok(_) => {
                cmd.args(["--ro-bind", dir, dir]);
            }
            Err(_) => {}
        }
    }
}

/// Interpreter installs outside the system dirs (pyenv, nvm, /opt) are
/// mounted read-only at the same path.
fn runtime_prefix_mount(prefix: &Path) -> Option<String> {
    if prefix == Path::new("/") {
        return None;
    }
    if SYSTEM_DIRS.iter().any(|d| prefix.starts_with(d)) {
        return None;
    }
    Some(path_str(prefix))
}

impl SandboxBackend for BwrapBackend {
    fn name(&self) -> &str {
        "bwrap"
    }

    fn view(&self, _plan: &RunPlan<'_>) -> IsolationView {
        IsolationView {
            workspace: PathBuf::from(SANDBOX_WORKSPACE),
            skills: PathBuf::from(SANDBOX_SKILLS),
            bridge_socket: PathBuf::from(SANDBOX_BRIDGE_SOCKET),
        }
    }

    fn command(
        &self,
        plan: &RunPlan<'_>,
        view: &IsolationView,
        invocation: &Invocation,
    ) -> Result<PreparedCommand, SandboxError> {
        let mut cmd = Command::new(&self.bwrap);
        cmd.env_clear();

        cmd.args(["--unshare-all", "--unshare-user"]);
        cmd.args(["--uid", NOBODY, "--gid", NOBODY]);
        cmd.args(["--die-with-parent", "--new-session"]);
        cmd.args(["--cap-drop", "ALL"]);
        cmd.arg("--clearenv");

        mount_system_dirs(&mut cmd);
        if let Some(prefix) = plan.runtime.prefix().as_deref().and_then(runtime_prefix_mount) {
            cmd.args(["--ro-bind", &prefix, &prefix]);
        }

        cmd.args(["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]);

        let workspace = path_str(&plan.session.workspace_dir);
        let skills = path_str(&plan.session.skills_dir);
        let socket = path_str(plan.bridge_socket);
        cmd.args(["--bind", &workspace, &path_str(&view.workspace)]);
        cmd.args(["--bind", &skills, &path_str(&view.skills)]);
        cmd.args(["--bind", &socket, &path_str(&view.bridge_socket)]);

        for dir in MANDATORY_DENY_DIRECTORIES {
            if plan.session.skills_dir.join(dir).exists() {
                cmd.args(["--tmpfs", &path_str(&view.skills.join(dir))]);
            }
        }

        cmd.args(["--chdir", &path_str(&view.workspace)]);
        for (key, value) in &invocation.env {
            cmd.args(["--setenv", key.as_str(), value.as_str()]);
        }

        let filter = seccomp::write_filter_file(&plan.scratch_dir.join("seccomp.bpf"))
            .map_err(|e| SandboxError::BackendUnavailable(format!("seccomp filter: {}", e)))?;
        let fd = filter.as_raw_fd();
        cmd.args(["--seccomp", &fd.to_string()]);
        // The filter fd has to survive exec into bwrap.
        unsafe {
            cmd.pre_exec(move || {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.arg("--");
        cmd.arg(&invocation.program);
        cmd.args(&invocation.args);

        Ok(PreparedCommand {
            command: cmd,
            guards: vec![filter],
        })
    }
}
