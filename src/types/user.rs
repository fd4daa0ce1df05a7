use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How to authenticate against the provider's IMAP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthMethod {
    /// Plain LOGIN with username and password
    Password { user: String, password: String },
    /// XOAUTH2 SASL with a ready-to-use access token
    XOAuth2 { user: String, access_token: String },
}

/// IMAP endpoint for a user's provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// IMAP server hostname
    pub host: String,

    /// IMAP server port (default: 993 for TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Use TLS encryption
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Authentication method
    pub auth: AuthMethod,
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

/// A user's sync state as loaded from the store.
///
/// Workers treat this as an immutable snapshot: every mutation goes through
/// the work pool, and the worker replaces its copy with the record the pool
/// hands back. `last_uid` is only meaningful within the UID space named by
/// `last_uid_validity`.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub provider: ProviderConfig,
    pub last_uid: Option<u32>,
    pub last_uid_validity: Option<String>,
    pub last_email_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Login name the provider expects, regardless of auth method.
    pub fn login_name(&self) -> &str {
        match &self.provider.auth {
            AuthMethod::Password { user, .. } => user,
            AuthMethod::XOAuth2 { user, .. } => user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_defaults() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"host": "imap.example.com", "auth": {"type": "password", "user": "a@example.com", "password": "hunter2"}}"#,
        )
        .unwrap();

        assert_eq!(config.port, 993);
        assert!(config.tls);
    }

    #[test]
    fn test_auth_method_tagged_json() {
        let json = r#"{"type": "xoauth2", "user": "a@example.com", "access_token": "tok"}"#;
        let auth: AuthMethod = serde_json::from_str(json).unwrap();
        match auth {
            AuthMethod::XOAuth2 { user, access_token } => {
                assert_eq!(user, "a@example.com");
                assert_eq!(access_token, "tok");
            }
            _ => panic!("Expected XOAuth2"),
        }
    }
}
