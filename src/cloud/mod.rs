//! KT Cloud API access
//!
//! [`CloudApi`] is the seam between the reconcilers and the provider. The
//! reqwest-backed [`KtCloudClient`] implements it; tests use the generated
//! `MockCloudApi`. [`provisioner`] maps machine specs to requests and provider
//! responses back to machine status.

mod client;
pub mod provisioner;
pub mod types;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(test)]
use mockall::automock;

use crate::Error;

pub use client::KtCloudClient;
pub use types::{PublicIp, Server, ServerCreate, StaticNatRequest};

/// Header carrying the subject token on every API call
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header the identity API returns the new token in
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// A KT Cloud API token
///
/// The value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SubjectToken(String);

impl SubjectToken {
    /// Wrap a raw token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token value, for the request header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectToken(<redacted>)")
    }
}

/// A token freshly minted by the identity API
#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// The token
    pub token: SubjectToken,
    /// When the provider stops accepting it, if reported
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operations the reconcilers need from the provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Create a server; the response identifies it
    async fn create_instance(
        &self,
        token: &SubjectToken,
        server: &ServerCreate,
    ) -> Result<Server, Error>;

    /// Fetch the provider's current record of a server
    async fn query_instance(&self, token: &SubjectToken, server_id: &str)
        -> Result<Server, Error>;

    /// Every public address of the account, bound or not
    async fn list_floating_addresses(&self, token: &SubjectToken) -> Result<Vec<PublicIp>, Error>;

    /// Public addresses that can be bound right now
    async fn list_available_floating_addresses(
        &self,
        token: &SubjectToken,
    ) -> Result<Vec<PublicIp>, Error>;

    /// Bind a public address to a private one with static NAT
    async fn attach_floating_address(
        &self,
        token: &SubjectToken,
        request: &StaticNatRequest,
    ) -> Result<(), Error>;
}
