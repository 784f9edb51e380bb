pub mod cmdline;
pub mod detector;
pub mod launcher;
pub mod probe;
pub mod starter;

pub use detector::{Detector, DiscoveredInstance, PortScanDetector};
pub use launcher::build_command;
pub use probe::{HttpPortProbe, PortProbe, ProductInfo, ProductType};
pub use starter::{ProcessHandle, ProcessStarter, Starter};
