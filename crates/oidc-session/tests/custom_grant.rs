//! Custom grants and account switching

mod common;

use common::*;
use oidc_session::{AccountSwitchRequest, CustomGrantOutcome, CustomGrantRequest, Error};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn signed_in(idp: &MockIdentityProvider) -> Harness {
    idp.mock_provider().await;
    let harness = Harness::worker(config(idp).with_client_secret("s3cr3t"));
    harness
        .client
        .tokens()
        .metadata()
        .ensure_initialized(harness.client.config(), false)
        .await
        .unwrap();
    harness.seed_session(idp, current_timestamp(), 3600);
    harness
}

#[tokio::test]
async fn test_placeholders_and_bearer_header() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&idp.server)
        .await;

    let request = CustomGrantRequest::new()
        .param("grant_type", "urn:example:delegate")
        .param("subject_token", "{{token}}")
        .param("actor", "{{username}}@{{clientID}}")
        .param("scope", "{{scope}}")
        .param("client_secret", "{{clientSecret}}")
        .attach_token(true);
    let outcome = harness.client.custom_grant(&request).await.unwrap();
    assert_eq!(outcome, CustomGrantOutcome::Success);

    let requests = idp.requests_to("/oauth2/token").await;
    assert_eq!(
        form(&requests[0]),
        vec![
            ("grant_type".to_string(), "urn:example:delegate".to_string()),
            ("subject_token".to_string(), "AT1".to_string()),
            ("actor".to_string(), format!("alice@{CLIENT_ID}")),
            (
                "scope".to_string(),
                "openid internal_login internal_humantask_view".to_string()
            ),
            ("client_secret".to_string(), "s3cr3t".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed_before_grant() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    harness.seed_session(&idp, current_timestamp() - 3500, 3600);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(idp.token_body("AT2", Some("RT2"), "alice")),
        )
        .expect(1)
        .mount(&idp.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", "Bearer AT2"))
        .and(body_string_contains("subject_token=AT2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&idp.server)
        .await;

    let request = CustomGrantRequest::new()
        .param("grant_type", "urn:example:delegate")
        .param("subject_token", "{{token}}")
        .attach_token(true);
    let outcome = harness.client.custom_grant(&request).await.unwrap();
    assert_eq!(outcome, CustomGrantOutcome::Success);
    assert_eq!(harness.store().session().unwrap().unwrap().access_token, "AT2");
}

#[tokio::test]
async fn test_raw_response_is_returned_on_request() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "r-42")
                .set_body_json(json!({"delegated": "yes"})),
        )
        .mount(&idp.server)
        .await;

    let request = CustomGrantRequest::new()
        .param("grant_type", "urn:example:delegate")
        .return_response(true);
    let CustomGrantOutcome::Response(response) =
        harness.client.custom_grant(&request).await.unwrap()
    else {
        panic!("expected the raw response");
    };

    assert_eq!(response.status, 200);
    assert_eq!(response.json().unwrap()["delegated"], "yes");
    assert!(
        response
            .headers
            .contains(&("x-request-id".to_string(), "r-42".to_string()))
    );
    assert_eq!(harness.store().session().unwrap().unwrap().access_token, "AT1");
}

#[tokio::test]
async fn test_grant_failure_is_surfaced() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&idp.server)
        .await;

    let request = CustomGrantRequest::new().param("grant_type", "x");
    let err = harness.client.custom_grant(&request).await.unwrap_err();
    assert!(matches!(err, Error::GrantFailed { status: 403, .. }));
    assert!(harness.client.is_signed_in().unwrap());
}

#[tokio::test]
async fn test_session_returning_grant_replaces_session() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(idp.token_body("AT9", Some("RT9"), "carol")),
        )
        .mount(&idp.server)
        .await;

    let request = CustomGrantRequest::new()
        .param("grant_type", "urn:example:impersonate")
        .returns_session(true);
    assert_eq!(
        harness.client.custom_grant(&request).await.unwrap(),
        CustomGrantOutcome::Success
    );

    let record = harness.store().session().unwrap().unwrap();
    assert_eq!(record.access_token, "AT9");
    assert_eq!(record.username, "carol");
}

#[tokio::test]
async fn test_switch_account() {
    let idp = MockIdentityProvider::start().await;
    let harness = signed_in(&idp).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=account_switch"))
        .and(body_string_contains("userstore-domain=PRIMARY"))
        .and(body_string_contains("tenant-domain=wso2.com"))
        .and(body_string_contains("token=AT1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(idp.token_body("AT-bob", None, "bob")),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let user = harness
        .client
        .switch_account(AccountSwitchRequest::new("bob", "PRIMARY", "wso2.com"))
        .await
        .unwrap();

    assert_eq!(user.username, "bob");
    assert_eq!(user.display_name, "bob-display");
    assert_eq!(
        user.authorization_endpoint,
        Some(idp.endpoint("/oauth2/authorize"))
    );
    assert_eq!(
        harness.client.get_access_token().await.unwrap(),
        "AT-bob"
    );
}

#[tokio::test]
async fn test_switch_account_requires_session() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_provider().await;
    let harness = Harness::worker(config(&idp));

    let err = harness
        .client
        .switch_account(AccountSwitchRequest::new("bob", "PRIMARY", "wso2.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSignedIn));
}
