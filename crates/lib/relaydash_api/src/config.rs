//! API server configuration.

use relaydash_core::auth::jwt::DEFAULT_ISSUER;

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// `iss` claim of issued tokens.
    pub token_issuer: String,
    /// Password of the bootstrap `admin` account. No account is provisioned
    /// when unset.
    pub admin_password: Option<String>,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable         | Default                                 |
    /// |------------------|-----------------------------------------|
    /// | `BIND_ADDR`      | `127.0.0.1:3100`                        |
    /// | `DATABASE_URL`   | `postgres://localhost:5432/relaydash`   |
    /// | `TOKEN_ISSUER`   | `relaydash`                             |
    /// | `ADMIN_PASSWORD` | unset                                   |
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/relaydash".into()),
            token_issuer: std::env::var("TOKEN_ISSUER")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_ISSUER.into()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty()),
        }
    }
}

// The admin password stays out of logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("token_issuer", &self.token_issuer)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_admin_password() {
        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".into(),
            pg_connection_url: "postgres://user:pw@localhost/relaydash".into(),
            token_issuer: DEFAULT_ISSUER.into(),
            admin_password: Some("hunter2".into()),
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("user:pw"));
        assert!(rendered.contains("127.0.0.1:0"));
    }

    #[test]
    fn from_env_always_has_an_issuer() {
        assert!(!ApiConfig::from_env().token_issuer.is_empty());
    }
}
