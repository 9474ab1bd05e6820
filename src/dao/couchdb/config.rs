use super::error::{CouchDaoError, CouchResult};

/// Basic-auth credentials sent with every CouchDB request.
#[derive(Debug, Clone)]
pub struct CouchCredentials {
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

/// Where the CouchDB server lives and which database holds rows and leases.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server URL without a trailing slash.
    pub base_url: String,
    /// Database holding both rows and leases.
    pub database: String,
    /// Sent with every request when set.
    pub credentials: Option<CouchCredentials>,
}

impl CouchConfig {
    /// Anonymous access to `database` on `base_url`.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            database: database.into(),
            credentials: None,
        }
    }

    /// Attach basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(CouchCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Read `COUCH_BASE_URL` and `COUCH_DB`, plus `COUCH_USERNAME`/`COUCH_PASSWORD` when both are set.
    pub fn from_env() -> CouchResult<Self> {
        let config = Self::new(required("COUCH_BASE_URL")?, required("COUCH_DB")?);
        match (
            std::env::var("COUCH_USERNAME").ok(),
            std::env::var("COUCH_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Ok(config.with_credentials(username, password)),
            _ => Ok(config),
        }
    }

    /// URL of the configured database.
    pub fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }
}

fn required(var: &'static str) -> CouchResult<String> {
    std::env::var(var).map_err(|_| CouchDaoError::MissingEnvVar { var })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped_from_base_url() {
        let config = CouchConfig::new("http://couch:5984/", "cards");
        assert_eq!(config.database_url(), "http://couch:5984/cards");
    }

    #[test]
    fn credentials_are_attached() {
        let config = CouchConfig::new("http://couch", "cards").with_credentials("admin", "pw");
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password, "pw");
    }
}
