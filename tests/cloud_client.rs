//! Integration tests for the KT Cloud API client using wiremock.
//!
//! These tests verify request shapes, headers and response handling against a
//! mock HTTP server standing in for the provider.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ktcloud_operator::cloud::types::NetworkAttachment;
use ktcloud_operator::cloud::{
    CloudApi, KtCloudClient, ServerCreate, StaticNatRequest, SubjectToken,
};
use ktcloud_operator::config::{CloudConfig, IdentityConfig};
use ktcloud_operator::Error;

// =============================================================================
// Test Helpers
// =============================================================================

fn create_client(server: &MockServer) -> KtCloudClient {
    create_client_with_timeout(server, 5)
}

fn create_client_with_timeout(server: &MockServer, timeout_secs: u64) -> KtCloudClient {
    let config = CloudConfig {
        api_base_url: server.uri(),
        zone: "gd1".to_string(),
        timeout_secs,
    };
    KtCloudClient::new(config).unwrap()
}

fn token() -> SubjectToken {
    SubjectToken::new("gAAAAABtoken")
}

fn identity() -> IdentityConfig {
    IdentityConfig {
        methods: vec!["password".to_string()],
        user_domain_id: "default".to_string(),
        username: "ops".to_string(),
        password: "hunter2".to_string(),
        project_domain_id: "default".to_string(),
        project_name: "demo".to_string(),
    }
}

// =============================================================================
// Servers
// =============================================================================

#[tokio::test]
async fn test_create_instance_posts_nova_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/server/servers"))
        .and(header("X-Auth-Token", "gAAAAABtoken"))
        .and(body_json(json!({
            "server": {
                "name": "demo-md-0-abc",
                "key_name": "ops",
                "flavorRef": "2x4",
                "availability_zone": "DX-M1",
                "networks": [{"uuid": "net-1"}]
            }
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "server": {
                "id": "srv-1",
                "adminPass": "pw",
                "links": [{"rel": "self", "href": "https://example/servers/srv-1"}],
                "security_groups": [{"name": "default"}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_client(&server);
    let request = ServerCreate {
        name: "demo-md-0-abc".to_string(),
        key_name: "ops".to_string(),
        flavor_ref: "2x4".to_string(),
        availability_zone: "DX-M1".to_string(),
        networks: vec![NetworkAttachment {
            uuid: Some("net-1".to_string()),
            port: None,
        }],
        ..Default::default()
    };

    let created = client.create_instance(&token(), &request).await.unwrap();
    assert_eq!(created.id, "srv-1");
    assert_eq!(created.admin_pass.as_deref(), Some("pw"));
    assert_eq!(created.security_groups[0].name, "default");
}

#[tokio::test]
async fn test_query_instance_reads_extended_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gd1/server/servers/srv-1"))
        .and(header("X-Auth-Token", "gAAAAABtoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": {
                "id": "srv-1",
                "status": "ACTIVE",
                "OS-EXT-STS:vm_state": "active",
                "addresses": {
                    "tier-1": [{"addr": "172.25.0.10", "version": 4, "OS-EXT-IPS:type": "fixed"}]
                }
            }
        })))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let found = client.query_instance(&token(), "srv-1").await.unwrap();
    assert_eq!(found.status.as_deref(), Some("ACTIVE"));
    assert_eq!(found.addresses["tier-1"][0].addr, "172.25.0.10");
}

#[tokio::test]
async fn test_query_instance_server_error_includes_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gd1/server/servers/srv-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let err = client.query_instance(&token(), "srv-1").await.unwrap_err();
    match err {
        Error::Provider(message) => {
            assert!(message.contains("503"), "missing status: {message}");
            assert!(message.contains("maintenance"), "missing body: {message}");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_instance_times_out_on_slow_provider() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gd1/server/servers/srv-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"server": {"id": "srv-1"}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = create_client_with_timeout(&server, 1);
    let result = tokio::time::timeout(
        Duration::from_secs(4),
        client.query_instance(&token(), "srv-1"),
    )
    .await
    .expect("client timeout should fire before the response arrives");

    match result {
        Err(Error::Http(e)) => assert!(e.is_timeout(), "expected a timeout, got {e}"),
        other => panic!("expected an http timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_instance_rejects_path_like_ids() {
    let server = MockServer::start().await;
    let client = create_client(&server);

    let result = client.query_instance(&token(), "../servers").await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

// =============================================================================
// Public addresses
// =============================================================================

#[tokio::test]
async fn test_list_floating_addresses_keeps_only_free_ones() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gd1/nc/IpAddress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nc_listentpublicipsresponse": {
                "publicips": [
                    {"id": "pub-1", "ip": "1.2.3.4", "type": "ASSOCIATE", "virtualips": []},
                    {"id": "pub-2", "ip": "1.2.3.5", "type": "ASSOCIATE",
                     "virtualips": [{"id": "vip-1", "vmguestip": "172.25.0.11"}]},
                    {"id": "pub-3", "ip": "1.2.3.6", "type": "SOURCENAT", "virtualips": []}
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let free = client.list_available_floating_addresses(&token()).await.unwrap();
    let ids: Vec<_> = free.iter().map(|ip| ip.id.as_str()).collect();
    assert_eq!(ids, vec!["pub-1"]);
}

#[tokio::test]
async fn test_list_all_floating_addresses_keeps_bindings() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gd1/nc/IpAddress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nc_listentpublicipsresponse": {
                "publicips": [
                    {"id": "pub-1", "ip": "1.2.3.4", "type": "ASSOCIATE", "virtualips": []},
                    {"id": "pub-2", "ip": "1.2.3.5", "type": "ASSOCIATE",
                     "virtualips": [{"id": "vip-1", "vmguestip": "172.25.0.11"}]}
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let all = client.list_floating_addresses(&token()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[1].is_bound_to("172.25.0.11"));
    assert!(!all[0].is_bound_to("172.25.0.11"));
}

#[tokio::test]
async fn test_attach_floating_address_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/nc/StaticNat"))
        .and(body_json(json!({
            "vmguestip": "172.25.0.10",
            "vmnetworkid": "tier-1",
            "entpublicipid": "pub-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nc_enablestaticnatresponse": {"displaytext": "", "success": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_client(&server);
    let request = StaticNatRequest {
        vmguestip: "172.25.0.10".to_string(),
        vmnetworkid: "tier-1".to_string(),
        entpublicipid: "pub-1".to_string(),
    };
    client.attach_floating_address(&token(), &request).await.unwrap();
}

#[tokio::test]
async fn test_attach_floating_address_failure_surfaces_display_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/nc/StaticNat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nc_enablestaticnatresponse": {
                "displaytext": "The IP address is already in use",
                "success": false
            }
        })))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let request = StaticNatRequest {
        vmguestip: "172.25.0.10".to_string(),
        vmnetworkid: "tier-1".to_string(),
        entpublicipid: "pub-1".to_string(),
    };
    let err = client
        .attach_floating_address(&token(), &request)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "provider error: The IP address is already in use");
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test]
async fn test_authenticate_reads_subject_token_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/identity/auth/tokens"))
        .and(body_json(json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "domain": {"id": "default"},
                            "name": "ops",
                            "password": "hunter2"
                        }
                    }
                },
                "scope": {
                    "project": {
                        "domain": {"id": "default"},
                        "name": "demo"
                    }
                }
            }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "gAAAAABnew")
                .set_body_json(json!({"token": {"expires_at": "2026-10-20T12:00:00Z"}})),
        )
        .mount(&server)
        .await;

    let client = create_client(&server);
    let issued = client.authenticate(&identity()).await.unwrap();
    assert_eq!(issued.token.expose(), "gAAAAABnew");
    assert_eq!(
        issued.expires_at.map(|at| at.to_rfc3339()),
        Some("2026-10-20T12:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn test_authenticate_without_token_header_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/identity/auth/tokens"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": {}})))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let result = client.authenticate(&identity()).await;
    assert!(matches!(result, Err(Error::Provider(_))));
}

#[tokio::test]
async fn test_authenticate_rejected_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/gd1/identity/auth/tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let client = create_client(&server);
    let err = client.authenticate(&identity()).await.unwrap_err();
    assert!(err.to_string().contains("401"));
}
