pub use self::client::GitHubClient;
pub use self::config::GitHubConfig;
pub use self::signature::{sign_payload, verify_signature};

mod client;
mod config;
mod signature;
