//! reqwest implementation of [`CloudApi`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use super::types::{
    available_addresses, Auth, AuthDomain, AuthIdentity, AuthPassword, AuthProject, AuthRequest,
    AuthResponse, AuthScope, AuthUser, CreateServerRequest, PublicIpListEnvelope, ServerEnvelope,
    StaticNatEnvelope,
};
use super::{
    CloudApi, IssuedToken, PublicIp, Server, ServerCreate, StaticNatRequest, SubjectToken,
    AUTH_TOKEN_HEADER, SUBJECT_TOKEN_HEADER,
};
use crate::config::{CloudConfig, IdentityConfig};
use crate::Error;

/// KT Cloud API client
///
/// Every request carries the configured timeout; a timeout surfaces as
/// [`Error::Http`] and is retried by the caller like any other failure.
#[derive(Clone, Debug)]
pub struct KtCloudClient {
    http: reqwest::Client,
    config: CloudConfig,
}

impl KtCloudClient {
    /// Create a client for the given endpoint configuration
    pub fn new(config: CloudConfig) -> Result<Self, Error> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Exchange identity credentials for a subject token
    ///
    /// Only the `login` subcommand calls this; the controllers consume tokens
    /// that already exist.
    #[instrument(skip(self, identity), fields(user = %identity.username))]
    pub async fn authenticate(&self, identity: &IdentityConfig) -> Result<IssuedToken, Error> {
        identity.validate()?;
        let body = AuthRequest {
            auth: Auth {
                identity: AuthIdentity {
                    methods: &identity.methods,
                    password: AuthPassword {
                        user: AuthUser {
                            domain: AuthDomain {
                                id: &identity.user_domain_id,
                            },
                            name: &identity.username,
                            password: &identity.password,
                        },
                    },
                },
                scope: AuthScope {
                    project: AuthProject {
                        domain: AuthDomain {
                            id: &identity.project_domain_id,
                        },
                        name: &identity.project_name,
                    },
                },
            },
        };

        let url = self.config.endpoint("identity/auth/tokens")?;
        let response = check_status(
            "authenticate",
            self.http.post(url).json(&body).send().await?,
        )
        .await?;

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(SubjectToken::new)
            .ok_or_else(|| {
                Error::provider(format!("authenticate: response has no {SUBJECT_TOKEN_HEADER} header"))
            })?;

        let bytes = response.bytes().await?;
        let expires_at = serde_json::from_slice::<AuthResponse>(&bytes)
            .ok()
            .and_then(|r| r.token.expires_at)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc));

        info!(expires_at = ?expires_at, "obtained subject token");
        Ok(IssuedToken { token, expires_at })
    }

    fn request(&self, method: Method, path: &str, token: &SubjectToken) -> Result<RequestBuilder, Error> {
        let url = self.config.endpoint(path)?;
        debug!(%method, %url, "cloud api request");
        Ok(self
            .http
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, token.expose()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, Error> {
        let response = check_status(operation, request.send().await?).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization(format!("{operation}: invalid response body: {e}")))
    }
}

/// Turn a non-2xx response into a provider error that includes the body
async fn check_status(operation: &str, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::provider(format!(
        "{operation} failed with status {status}: {body}"
    )))
}

#[async_trait]
impl CloudApi for KtCloudClient {
    #[instrument(skip(self, token, server), fields(server = %server.name))]
    async fn create_instance(
        &self,
        token: &SubjectToken,
        server: &ServerCreate,
    ) -> Result<Server, Error> {
        let request = self
            .request(Method::POST, "server/servers", token)?
            .json(&CreateServerRequest { server });
        let envelope: ServerEnvelope = self.send_json("create server", request).await?;
        Ok(envelope.server)
    }

    #[instrument(skip(self, token))]
    async fn query_instance(&self, token: &SubjectToken, server_id: &str) -> Result<Server, Error> {
        if server_id.is_empty() || server_id.contains('/') {
            return Err(Error::validation(format!("invalid server id '{server_id}'")));
        }
        let request = self.request(Method::GET, &format!("server/servers/{server_id}"), token)?;
        let envelope: ServerEnvelope = self.send_json("query server", request).await?;
        Ok(envelope.server)
    }

    #[instrument(skip(self, token))]
    async fn list_floating_addresses(&self, token: &SubjectToken) -> Result<Vec<PublicIp>, Error> {
        let request = self.request(Method::GET, "nc/IpAddress", token)?;
        let envelope: PublicIpListEnvelope = self.send_json("list public ips", request).await?;
        Ok(envelope.nc_listentpublicipsresponse.publicips)
    }

    #[instrument(skip(self, token))]
    async fn list_available_floating_addresses(
        &self,
        token: &SubjectToken,
    ) -> Result<Vec<PublicIp>, Error> {
        let all = self.list_floating_addresses(token).await?;
        let total = all.len();
        let free = available_addresses(all);
        debug!(total, available = free.len(), "listed public addresses");
        Ok(free)
    }

    #[instrument(skip(self, token, request), fields(public_ip = %request.entpublicipid))]
    async fn attach_floating_address(
        &self,
        token: &SubjectToken,
        request: &StaticNatRequest,
    ) -> Result<(), Error> {
        let builder = self
            .request(Method::POST, "nc/StaticNat", token)?
            .json(request);
        let envelope: StaticNatEnvelope = self.send_json("enable static nat", builder).await?;
        let result = envelope.nc_enablestaticnatresponse;
        if !result.success {
            return Err(Error::provider(result.displaytext));
        }
        Ok(())
    }
}
