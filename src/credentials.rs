//! Subject token lookup for machines
//!
//! A machine borrows the API token of the cluster it belongs to. The cluster
//! is found by walking the machine's lineage; the token is the KTSubjectToken
//! named after that cluster in the machine's namespace.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::debug;

use crate::cloud::SubjectToken;
use crate::crd::{KTCluster, KTMachine};
use crate::graph::{Lineage, MissingLink, OwnershipResolver};
use crate::store::KubeClient;
use crate::Error;

/// Why a machine has no usable token yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingReason {
    /// The chain up to the cluster is incomplete
    Lineage(MissingLink),
    /// No KTSubjectToken named after the cluster
    TokenMissing {
        /// Expected token name
        name: String,
    },
    /// The token resource holds no value
    TokenEmpty {
        /// Token name
        name: String,
    },
    /// The token's expiry has passed
    TokenExpired {
        /// Token name
        name: String,
        /// When it expired
        expired_at: DateTime<Utc>,
    },
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lineage(link) => write!(f, "{link}"),
            Self::TokenMissing { name } => write!(f, "KTSubjectToken {name} not found"),
            Self::TokenEmpty { name } => write!(f, "KTSubjectToken {name} is empty"),
            Self::TokenExpired { name, expired_at } => {
                write!(f, "KTSubjectToken {name} expired at {expired_at}")
            }
        }
    }
}

/// Outcome of looking up a machine's token
#[derive(Debug)]
pub enum TokenResolution {
    /// Token and owning cluster
    Ready {
        /// The token to authenticate with
        token: SubjectToken,
        /// The KTCluster the machine belongs to
        cluster: Box<KTCluster>,
    },
    /// Not available yet; retry later
    Pending(PendingReason),
}

/// Find the token for `machine`, checking expiry against the current time
pub async fn resolve_token(
    kube: &dyn KubeClient,
    machine: &KTMachine,
) -> Result<TokenResolution, Error> {
    resolve_token_at(kube, machine, Utc::now()).await
}

/// Find the token for `machine`, checking expiry against `now`
pub async fn resolve_token_at(
    kube: &dyn KubeClient,
    machine: &KTMachine,
    now: DateTime<Utc>,
) -> Result<TokenResolution, Error> {
    let cluster = match OwnershipResolver::new(kube).machine_lineage(machine).await? {
        Lineage::Complete(lineage) => lineage.cluster,
        Lineage::Broken(link) => return Ok(TokenResolution::Pending(PendingReason::Lineage(link))),
    };

    let namespace = machine.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let Some(resource) = kube.get_subject_token(&namespace, &name).await? else {
        return Ok(TokenResolution::Pending(PendingReason::TokenMissing { name }));
    };

    if resource.spec.subject_token.is_empty() {
        return Ok(TokenResolution::Pending(PendingReason::TokenEmpty { name }));
    }
    if resource.spec.is_expired_at(now) {
        let expired_at = resource.spec.expires_at.unwrap_or(now);
        return Ok(TokenResolution::Pending(PendingReason::TokenExpired {
            name,
            expired_at,
        }));
    }

    debug!(machine = %machine.name_any(), token = %name, "resolved subject token");
    Ok(TokenResolution::Ready {
        token: SubjectToken::new(resource.spec.subject_token),
        cluster: Box::new(cluster),
    })
}
