//! Multi-instance session management on top of the connection pool.

pub mod control;
pub mod manager;
pub mod types;
pub mod workspace;

pub use control::BrowserControl;
pub use manager::{Collaborators, SessionManager};
pub use types::*;
pub use workspace::{ChainResolver, WorkspaceInfo, WorkspaceResolver, WorkspaceStrategy};
