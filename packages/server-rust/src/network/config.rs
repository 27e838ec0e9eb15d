//! Admin HTTP surface configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub host: String,
    /// 0 means OS-assigned.
    pub port: u16,
    pub request_timeout: Duration,
    /// Bearer token required on mutating routes. `None` leaves them open.
    pub admin_token: Option<String>,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8700,
            request_timeout: Duration::from_secs(30),
            admin_token: None,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl AdminConfig {
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_without_token() {
        let config = AdminConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8700");
        assert!(config.admin_token.is_none());
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
    }
}
