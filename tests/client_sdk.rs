use countersign::api;
use countersign::application_port::TheftResponse;
use countersign::client::*;
use countersign::domain_model::UserId;
use countersign::server::Server;
use countersign::settings::*;
use serde_json::json;
use std::sync::Arc;

fn test_settings() -> Settings {
    Settings {
        http: Http {
            address: "127.0.0.1:0".to_string(),
            cert_path: None,
            key_path: None,
        },
        log: Log {
            filter: "info".to_string(),
        },
        session: Session {
            issuer: "client-test".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
            anti_csrf: false,
            theft_response: TheftResponse::Revoke,
        },
        keys: Keys {
            rotation_interval_secs: 0,
        },
        refresh: Refresh {
            secret_env: "COUNTERSIGN_TEST_UNSET_VARIABLE".to_string(),
            secret: Some("client-test-refresh-secret".to_string()),
        },
        store: Store {
            backend: "memory".to_string(),
            mysql_dsn: None,
            redis_dsn: None,
            redis_prefix: "test".to_string(),
            prune_interval_secs: 0,
        },
    }
}

async fn spawn_server() -> (Arc<Server>, String) {
    let server = Arc::new(Server::try_new(&test_settings()).await.unwrap());
    let (addr, serving) =
        warp::serve(api::v1::app(server.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    (server, format!("http://{addr}"))
}

#[tokio::test]
async fn connect_prefetches_handshake() {
    let (server, base_url) = spawn_server().await;
    let client = SessionClient::connect(base_url).await.unwrap();

    let cached = client.handshake_cache().get().await.unwrap();
    assert_eq!(
        cached.public_key,
        server.key_store.snapshot().current().public_info()
    );
    assert_eq!(cached.config.issuer, "client-test");
}

#[tokio::test]
async fn full_session_lifecycle() {
    let (_server, base_url) = spawn_server().await;
    let client = SessionClient::connect(base_url).await.unwrap();
    let user = UserId::from("u1");

    let created = client
        .create_new_session(&user, json!({"role": "admin"}), json!({"cart": []}))
        .await
        .unwrap();
    let handle = created.session.handle.clone();
    assert!(created.anti_csrf_token.is_none());

    let verified = client
        .get_session(&created.access_token.token, None, false)
        .await
        .unwrap();
    assert_eq!(verified.session.user_id, user);
    assert_eq!(verified.session.user_data_in_jwt, json!({"role": "admin"}));

    assert_eq!(client.get_session_data(&handle).await.unwrap(), json!({"cart": []}));
    client
        .update_session_data(&handle, json!({"cart": [1]}))
        .await
        .unwrap();
    assert_eq!(client.get_session_data(&handle).await.unwrap(), json!({"cart": [1]}));

    client
        .update_jwt_payload(&handle, json!({"role": "user"}))
        .await
        .unwrap();
    assert_eq!(client.get_jwt_payload(&handle).await.unwrap(), json!({"role": "user"}));

    assert_eq!(
        client.get_all_session_handles_for_user(&user).await.unwrap(),
        vec![handle.clone()]
    );

    let refreshed = client
        .refresh_session(&created.refresh_token.token)
        .await
        .unwrap();
    assert_eq!(refreshed.session.user_data_in_jwt, json!({"role": "user"}));

    match client.refresh_session(&created.refresh_token.token).await {
        Err(ClientError::TokenTheftDetected {
            session_handle,
            user_id,
        }) => {
            assert_eq!(session_handle, handle);
            assert_eq!(user_id, user);
        }
        other => panic!("expected theft, got {other:?}"),
    }

    // Revoked by the theft policy.
    assert!(!client.revoke_session(&handle).await.unwrap());
    assert_eq!(client.revoke_all_sessions_for_user(&user).await.unwrap(), 0);
}

#[tokio::test]
async fn unauthorised_verify_invalidates_handshake_cache() {
    let (_server, base_url) = spawn_server().await;
    let client = SessionClient::connect(base_url).await.unwrap();
    assert!(client.handshake_cache().get().await.is_some());

    let result = client.get_session("not-a-token", None, false).await;
    assert!(matches!(result, Err(ClientError::Unauthorised(_))));
    assert!(client.handshake_cache().get().await.is_none());

    // Refetched lazily.
    let info = client.handshake_info().await.unwrap();
    assert_eq!(info.config.issuer, "client-test");
    assert!(client.handshake_cache().get().await.is_some());
}

#[tokio::test]
async fn rotation_is_picked_up_without_polling() {
    let (server, base_url) = spawn_server().await;
    let client = SessionClient::connect(base_url).await.unwrap();
    let user = UserId::from("u1");

    let before = client
        .create_new_session(&user, json!({}), json!({}))
        .await
        .unwrap();
    let new_kid = server.key_store.rotate().unwrap();

    let verified = client
        .get_session(&before.access_token.token, None, false)
        .await
        .unwrap();
    assert_eq!(verified.current_public_key.kid, new_kid);
    let resigned = verified.access_token.expect("re-signed token");
    assert_eq!(resigned.expiry, before.access_token.expiry);

    let cached = client.handshake_cache().get().await.unwrap();
    assert_eq!(cached.public_key.kid, new_kid);

    let again = client.get_session(&resigned.token, None, false).await.unwrap();
    assert!(again.access_token.is_none());
}
