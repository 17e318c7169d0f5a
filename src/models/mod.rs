pub mod credentials;
pub mod http_context;
pub mod notification;

// Re-export the wire documents for easier importing
pub use credentials::{CredentialsInstall, DeviceCredentials};
pub use http_context::{ExpectedRequest, HttpContext, HttpMethod, RequiredResponse};
pub use notification::{NotificationEvent, NotificationMessage, NotifyContext};
