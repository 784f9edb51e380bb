//! Workspace resolution: which project directory a running instance has open.
//!
//! [`ChainResolver`] tries its strategies in order and stops at the first one
//! that names an existing directory. Later strategies are not consulted even
//! if they would also succeed.

use crate::process::{cmdline, ProcessStarter};
use crate::session::control::BrowserControl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::System;

/// Upper bound on the file summary kept per workspace
const MAX_LISTED_FILES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub path: PathBuf,
    /// Top-level entry names, sorted
    pub files: Vec<String>,
    /// Checked-out git branch, if any
    pub branch: Option<String>,
    /// Unix seconds
    pub resolved_at: u64,
}

impl WorkspaceInfo {
    /// Gather a summary of `path`. Unreadable parts are left empty.
    pub fn inspect(path: &Path) -> Self {
        let mut files: Vec<String> = std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files.truncate(MAX_LISTED_FILES);

        Self {
            path: path.to_path_buf(),
            files,
            branch: git_branch(path),
            resolved_at: unix_now(),
        }
    }

    /// [`inspect`](Self::inspect) on the blocking pool.
    pub async fn gather(path: PathBuf) -> Self {
        let fallback = path.clone();
        match tokio::task::spawn_blocking(move || Self::inspect(&path)).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Workspace inspection of {:?} failed: {}", fallback, e);
                Self {
                    path: fallback,
                    files: Vec::new(),
                    branch: None,
                    resolved_at: unix_now(),
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn git_branch(path: &Path) -> Option<String> {
    let head = std::fs::read_to_string(path.join(".git").join("HEAD")).ok()?;
    let head = head.trim();
    match head.strip_prefix("ref: refs/heads/") {
        Some(branch) => Some(branch.to_string()),
        // Detached HEAD
        None => Some(head.chars().take(12).collect()),
    }
}

#[async_trait]
pub trait WorkspaceResolver: Send + Sync {
    async fn resolve(&self, port: u16) -> Option<WorkspaceInfo>;
}

/// One way of locating a workspace directory.
#[async_trait]
pub trait WorkspaceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate(&self, port: u16) -> Option<PathBuf>;
}

pub struct ChainResolver {
    strategies: Vec<Box<dyn WorkspaceStrategy>>,
}

impl ChainResolver {
    pub fn new(strategies: Vec<Box<dyn WorkspaceStrategy>>) -> Self {
        Self { strategies }
    }

    /// Launch record, then process command line, then window title.
    pub fn standard(
        starter: Arc<ProcessStarter>,
        control: BrowserControl,
        roots: Vec<PathBuf>,
    ) -> Self {
        Self::new(vec![
            Box::new(LaunchRecordStrategy { starter }),
            Box::new(ProcessArgsStrategy),
            Box::new(WindowTitleStrategy { control, roots }),
        ])
    }
}

#[async_trait]
impl WorkspaceResolver for ChainResolver {
    async fn resolve(&self, port: u16) -> Option<WorkspaceInfo> {
        for strategy in &self.strategies {
            match strategy.locate(port).await {
                Some(path) if path.is_dir() => {
                    tracing::debug!(
                        "Workspace for port {} found by {}: {:?}",
                        port,
                        strategy.name(),
                        path
                    );
                    return Some(WorkspaceInfo::gather(path).await);
                }
                Some(path) => tracing::debug!(
                    "{} suggested {:?} for port {}, but it is not a directory",
                    strategy.name(),
                    path,
                    port
                ),
                None => {}
            }
        }
        None
    }
}

/// The directory we launched the instance with.
pub struct LaunchRecordStrategy {
    starter: Arc<ProcessStarter>,
}

#[async_trait]
impl WorkspaceStrategy for LaunchRecordStrategy {
    fn name(&self) -> &'static str {
        "launch-record"
    }

    async fn locate(&self, port: u16) -> Option<PathBuf> {
        self.starter.launched(port).map(|h| h.workspace)
    }
}

/// Last positional argument of the process that owns the debug port.
pub struct ProcessArgsStrategy;

#[async_trait]
impl WorkspaceStrategy for ProcessArgsStrategy {
    fn name(&self) -> &'static str {
        "process-args"
    }

    async fn locate(&self, port: u16) -> Option<PathBuf> {
        tokio::task::spawn_blocking(move || {
            let mut system = System::new();
            cmdline::find_debug_process(&mut system, port)
                .and_then(|(_, args)| cmdline::workspace_from_args(&args))
        })
        .await
        .ok()
        .flatten()
    }
}

/// Folder name from the editor window title, looked up under known roots.
pub struct WindowTitleStrategy {
    control: BrowserControl,
    roots: Vec<PathBuf>,
}

#[async_trait]
impl WorkspaceStrategy for WindowTitleStrategy {
    fn name(&self) -> &'static str {
        "window-title"
    }

    async fn locate(&self, port: u16) -> Option<PathBuf> {
        if self.roots.is_empty() {
            return None;
        }
        let title = self.control.page_title(port).await.ok()?;
        match_title(&title, &self.roots)
    }
}

/// Folder-name candidates from a title like `main.rs - my-project - Cursor`,
/// nearest to the product name first.
pub fn title_candidates(title: &str) -> Vec<String> {
    let title = title.trim().trim_start_matches('●').trim();
    let normalized = title.replace(" — ", " - ");
    let mut parts: Vec<&str> = normalized.split(" - ").map(str::trim).collect();
    // Drop the product name
    if parts.len() > 1 {
        parts.pop();
    }
    parts
        .into_iter()
        .rev()
        .map(|p| {
            // Remote suffixes such as "project [SSH: host]"
            p.split(" [").next().unwrap_or(p).trim().to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn match_title(title: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    title_candidates(title).into_iter().find_map(|name| {
        roots
            .iter()
            .map(|root| root.join(&name))
            .find(|candidate| candidate.is_dir())
    })
}
