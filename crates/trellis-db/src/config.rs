use std::env;

/// Store connection configuration.
///
/// Reads from the `ALPHRED_DB_PATH` environment variable, falling back to
/// `postgresql://localhost:5432/trellis` when unset. The variable is named
/// `ALPHRED_DB_PATH` rather than `..._URL` because it is part of the external
/// interface this crate was specified against; its value is a full
/// PostgreSQL connection string.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl StoreConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/trellis";

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let database_url =
            env::var("ALPHRED_DB_PATH").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Extract the database name from the URL.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
    }

    /// A URL pointing at the `postgres` maintenance database on the same
    /// host, used to issue `CREATE DATABASE` when the target DB is absent.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = StoreConfig::new(StoreConfig::DEFAULT_URL);
        assert_eq!(cfg.database_url, "postgresql://localhost:5432/trellis");
    }

    #[test]
    fn database_name_extraction() {
        let cfg = StoreConfig::new("postgresql://localhost:5432/mydb");
        assert_eq!(cfg.database_name(), Some("mydb"));
    }

    #[test]
    fn maintenance_url_replaces_db() {
        let cfg = StoreConfig::new("postgresql://localhost:5432/trellis");
        assert_eq!(
            cfg.maintenance_url(),
            "postgresql://localhost:5432/postgres"
        );
    }

    #[test]
    fn explicit_new() {
        let cfg = StoreConfig::new("postgresql://remotehost:5433/other");
        assert_eq!(cfg.database_url, "postgresql://remotehost:5433/other");
        assert_eq!(cfg.database_name(), Some("other"));
    }
}
