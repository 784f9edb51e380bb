//! Locating an editor process from its command line.

use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

pub fn debug_port_arg(port: u16) -> String {
    format!("--remote-debugging-port={}", port)
}

/// Find the process started with `--remote-debugging-port=<port>`.
///
/// Only the main editor process carries the flag; helpers and renderers
/// do not, so the first match is the one to signal.
pub fn find_debug_process(system: &mut System, port: u16) -> Option<(Pid, Vec<String>)> {
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
    );

    let flag = debug_port_arg(port);
    system
        .processes()
        .iter()
        .find(|(_, p)| p.cmd().iter().any(|arg| arg.to_str() == Some(flag.as_str())))
        .map(|(pid, p)| {
            let args = p
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            (*pid, args)
        })
}

/// Last positional argument after the executable, if any.
pub fn workspace_from_args(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .skip(1)
        .filter(|arg| !arg.starts_with('-') && !arg.is_empty())
        .last()
        .map(PathBuf::from)
}
