// File share API library
//
// HTTP upload endpoint and the WebSocket progress notification channel

pub mod http;

// Re-export commonly used types
pub use http::AppState;
