//! KTSubjectToken Custom Resource Definition
//!
//! A short-lived KT Cloud API token, named after the cluster it serves and
//! stored in the cluster's namespace. Something outside the controllers (the
//! `login` subcommand, or an operator) refreshes it; the controllers only read it.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a KTSubjectToken
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.dcnlab.ssu.ac.kr",
    version = "v1beta1",
    kind = "KTSubjectToken",
    plural = "ktsubjecttokens",
    shortname = "ktst",
    namespaced,
    printcolumn = r#"{"name":"Expires","type":"string","jsonPath":".spec.expiresAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KTSubjectTokenSpec {
    /// Token value sent as `X-Auth-Token`
    #[serde(default)]
    pub subject_token: String,

    /// When the provider stops accepting the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl KTSubjectTokenSpec {
    /// Returns true if the token has a known expiry that is not after `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
