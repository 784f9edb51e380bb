use crate::config::LauncherConfig;
use crate::process::cmdline::debug_port_arg;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Per-port user data directory so every launched instance is its own process.
pub fn user_data_dir(config: &LauncherConfig, port: u16) -> PathBuf {
    config.user_data_root.join(format!("port-{}", port))
}

/// Build the IDE launch command for `workspace` with remote debugging on `port`
pub fn build_command(config: &LauncherConfig, port: u16, workspace: &Path) -> Command {
    let mut cmd = Command::new(&config.executable);

    cmd.arg(debug_port_arg(port));
    cmd.arg(format!(
        "--user-data-dir={}",
        user_data_dir(config, port).display()
    ));
    cmd.arg("--new-window");

    for arg in &config.extra_args {
        cmd.arg(arg);
    }

    // Workspace goes last; the cmdline workspace lookup relies on it.
    cmd.arg(workspace);

    // Don't wait for the editor to exit
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Detach from parent process
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    cmd
}
