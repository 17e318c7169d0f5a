// Export service modules
pub mod auth;
pub mod context;
pub mod dispatcher;
pub mod signature;

// Re-export services for easier importing
pub use auth::{AuthService, RequestAuthenticator};
pub use context::ContextStore;
pub use dispatcher::NotificationDispatcher;
