use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Connection settings for the MySQL server holding the table to migrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MySqlConnectionConfig {
    /// Hostname or IP address of the MySQL server.
    pub host: String,
    /// Port number on which the MySQL server is listening.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default database of the session.
    pub name: String,
    pub username: String,
    /// Password for the specified user. Redacted in debug output.
    pub password: Option<SerializableSecretString>,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_port() -> u16 {
    3306
}

impl MySqlConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyField("connection.host".to_string()));
        }

        self.tls.validate()
    }
}

/// TLS settings for MySQL connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no
    /// certificates are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts a connection config into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for a session without a default database.
    fn without_db(&self) -> Output;

    /// Options for a session using the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<MySqlConnectOptions> for MySqlConnectionConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .charset("utf8mb4")
            .timezone(Some(String::from("+00:00")));

        if self.tls.enabled {
            options = options
                .ssl_mode(MySqlSslMode::VerifyIdentity)
                .ssl_ca_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        } else {
            options = options.ssl_mode(MySqlSslMode::Preferred);
        }

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> MySqlConnectOptions {
        let options: MySqlConnectOptions = self.without_db();
        options.database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_requires_certificates() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };
        assert_eq!(tls.validate(), Err(ValidationError::MissingTrustedRootCerts));
        assert_eq!(TlsConfig::default().validate(), Ok(()));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config: MySqlConnectionConfig = serde_json::from_str(
            r#"{"host": "localhost", "name": "test", "username": "osc", "password": "hunter2"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 3306);
        assert!(!format!("{config:?}").contains("hunter2"));
        assert_eq!(
            config.password.as_ref().map(|p| p.expose_secret()),
            Some("hunter2")
        );
    }
}
