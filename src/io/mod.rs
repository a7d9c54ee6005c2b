//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `proximity` - Bluetooth log source and the presence observer
//! - `automation` - Browser automation capability (W3C WebDriver)
//! - `login` - Credential form login for the attendance site
//! - `notify` - Desktop notifications
//! - `control` - HTTP control plane and Prometheus metrics

pub mod automation;
pub mod control;
pub mod login;
pub mod notify;
pub mod proximity;

// Re-export commonly used types
pub use automation::{Browser, Page, WebDriverBrowser};
pub use control::{start_control_server, ControlContext};
pub use login::{Authenticator, FormLogin};
pub use notify::{LogNotifier, Notification, Notifier, OsascriptNotifier};
pub use proximity::{CommandSource, PresenceObserver, ProximitySource};
