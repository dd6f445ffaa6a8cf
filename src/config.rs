//! Operator configuration
//!
//! Everything is read once at startup from flags or the environment and then
//! passed down explicitly. Nothing here is global.

use std::fmt;
use std::time::Duration;

use clap::Args;
use reqwest::Url;

use crate::retry::RequeuePolicy;
use crate::{Error, Result};

/// Default KT Cloud API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.ucloudbiz.olleh.com/";

/// Default KT Cloud zone
pub const DEFAULT_ZONE: &str = "gd1";

/// Where and how to reach the KT Cloud API
#[derive(Args, Clone, Debug, PartialEq)]
pub struct CloudConfig {
    /// Base URL of the KT Cloud API
    #[arg(long, env = "API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Zone prefix for every API path (e.g. `gd1`)
    #[arg(long, env = "ZONE", default_value = DEFAULT_ZONE)]
    pub zone: String,

    /// Timeout for a single API request, in seconds
    #[arg(long = "remote-backend-timeout", env = "REMOTE_BACKEND_TIMEOUT", default_value_t = 10)]
    pub timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            timeout_secs: 10,
        }
    }
}

impl CloudConfig {
    /// Check the configuration before anything talks to the API
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.zone.trim().is_empty() || self.zone.contains('/') {
            return Err(Error::config(format!("invalid zone '{}'", self.zone)));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config("remote backend timeout must be at least 1 second"));
        }
        Ok(())
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Absolute URL for `path` under the configured zone
    ///
    /// `endpoint("server/servers")` with the defaults yields
    /// `https://api.ucloudbiz.olleh.com/gd1/server/servers`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let relative = format!("{}/{}", self.zone, path.trim_start_matches('/'));
        self.base_url()?
            .join(&relative)
            .map_err(|e| Error::config(format!("invalid API path '{relative}': {e}")))
    }

    fn base_url(&self) -> Result<Url> {
        let mut base = self.api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid API base URL '{}': {e}", self.api_base_url)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(Error::config(format!(
                "API base URL must be http(s), got '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }
}

/// Reconciliation cadence and scope
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// First delay after a "not ready yet" or failed pass, in seconds
    #[arg(long, env = "PENDING_REQUEUE_SECS", default_value_t = 60)]
    pub pending_requeue_secs: u64,

    /// Upper bound for the backoff delay, in seconds
    #[arg(long, env = "MAX_REQUEUE_SECS", default_value_t = 600)]
    pub max_requeue_secs: u64,

    /// Poll interval while a server is being built, in seconds
    #[arg(long, env = "PROVISIONING_REQUEUE_SECS", default_value_t = 60)]
    pub provisioning_requeue_secs: u64,

    /// Poll interval once a machine is ready, in seconds
    #[arg(long, env = "STEADY_REQUEUE_SECS", default_value_t = 1800)]
    pub steady_requeue_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            pending_requeue_secs: 60,
            max_requeue_secs: 600,
            provisioning_requeue_secs: 60,
            steady_requeue_secs: 1800,
        }
    }
}

impl ControllerConfig {
    /// Check that the intervals make sense together
    pub fn validate(&self) -> Result<()> {
        if self.pending_requeue_secs == 0 || self.provisioning_requeue_secs == 0 {
            return Err(Error::config("requeue intervals must be at least 1 second"));
        }
        if self.max_requeue_secs < self.pending_requeue_secs {
            return Err(Error::config(format!(
                "max requeue ({}s) is shorter than the pending requeue ({}s)",
                self.max_requeue_secs, self.pending_requeue_secs
            )));
        }
        if self.steady_requeue_secs < self.provisioning_requeue_secs {
            return Err(Error::config(format!(
                "steady requeue ({}s) is shorter than the provisioning requeue ({}s)",
                self.steady_requeue_secs, self.provisioning_requeue_secs
            )));
        }
        Ok(())
    }

    /// Backoff schedule for pending and failed passes
    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            initial: Duration::from_secs(self.pending_requeue_secs),
            max: Duration::from_secs(self.max_requeue_secs),
            multiplier: 2.0,
        }
    }

    /// Poll interval while the provider is still building a server
    pub fn provisioning_interval(&self) -> Duration {
        Duration::from_secs(self.provisioning_requeue_secs)
    }

    /// Poll interval once a machine has converged
    pub fn steady_interval(&self) -> Duration {
        Duration::from_secs(self.steady_requeue_secs)
    }
}

/// Credentials used by the `login` subcommand to mint a subject token
#[derive(Args, Clone, PartialEq)]
pub struct IdentityConfig {
    /// Authentication methods
    #[arg(long, env = "IDENTITY_METHODS", default_value = "password", value_delimiter = ',')]
    pub methods: Vec<String>,

    /// Domain of the user
    #[arg(long, env = "IDENTITY_PASSWORD_USER_DOMAIN_ID", default_value = "default")]
    pub user_domain_id: String,

    /// User name
    #[arg(long, env = "IDENTITY_PASSWORD_USERNAME")]
    pub username: String,

    /// Password
    #[arg(long, env = "IDENTITY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Domain of the project scope
    #[arg(long, env = "SCOPE_PROJECT_DOMAIN_ID", default_value = "default")]
    pub project_domain_id: String,

    /// Project name for the token scope
    #[arg(long, env = "SCOPE_PROJECT_NAME")]
    pub project_name: String,
}

impl IdentityConfig {
    /// Reject obviously incomplete credentials
    pub fn validate(&self) -> Result<()> {
        if self.methods.is_empty() {
            return Err(Error::config("at least one identity method is required"));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::config("identity username and password are required"));
        }
        if self.project_name.is_empty() {
            return Err(Error::config("scope project name is required"));
        }
        Ok(())
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("methods", &self.methods)
            .field("user_domain_id", &self.user_domain_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_domain_id", &self.project_domain_id)
            .field("project_name", &self.project_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        cloud: CloudConfig,
        #[command(flatten)]
        controller: ControllerConfig,
    }

    // ===== Cloud endpoint construction =====

    #[test]
    fn endpoint_joins_base_zone_and_path() {
        let cfg = CloudConfig::default();
        assert_eq!(
            cfg.endpoint("server/servers").unwrap().as_str(),
            "https://api.ucloudbiz.olleh.com/gd1/server/servers"
        );
        assert_eq!(
            cfg.endpoint("/nc/IpAddress").unwrap().as_str(),
            "https://api.ucloudbiz.olleh.com/gd1/nc/IpAddress"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_without_trailing_slash() {
        let cfg = CloudConfig {
            api_base_url: "http://127.0.0.1:8080/proxy".to_string(),
            zone: "d1".to_string(),
            timeout_secs: 5,
        };
        assert_eq!(
            cfg.endpoint("nc/StaticNat").unwrap().as_str(),
            "http://127.0.0.1:8080/proxy/d1/nc/StaticNat"
        );
    }

    #[test]
    fn invalid_cloud_config_is_rejected() {
        let bad_url = CloudConfig {
            api_base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad_url.validate(), Err(Error::Config(_))));

        let bad_zone = CloudConfig {
            zone: String::new(),
            ..Default::default()
        };
        assert!(bad_zone.validate().is_err());

        let no_timeout = CloudConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());

        assert!(CloudConfig::default().validate().is_ok());
    }

    // ===== Controller cadence =====

    #[test]
    fn defaults_match_documented_cadence() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.controller, ControllerConfig::default());
        assert_eq!(cli.cloud.timeout(), Duration::from_secs(10));
        assert_eq!(cli.controller.steady_interval(), Duration::from_secs(1800));
        assert_eq!(
            cli.controller.requeue_policy().initial,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--zone",
            "d1",
            "--pending-requeue-secs",
            "5",
            "--max-requeue-secs",
            "40",
        ]);
        assert_eq!(cli.cloud.zone, "d1");
        assert_eq!(cli.controller.requeue_policy().max, Duration::from_secs(40));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let cfg = ControllerConfig {
            pending_requeue_secs: 120,
            max_requeue_secs: 60,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(ControllerConfig::default().validate().is_ok());
    }

    // ===== Identity =====

    #[test]
    fn identity_debug_hides_password() {
        let identity = IdentityConfig {
            methods: vec!["password".to_string()],
            user_domain_id: "default".to_string(),
            username: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
            project_domain_id: "default".to_string(),
            project_name: "demo".to_string(),
        };
        let printed = format!("{identity:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("ops@example.com"));
        assert!(identity.validate().is_ok());
    }
}
