use super::*;
use crate::config::SyncConfig;
use crate::state::test_helpers;
use axum::extract::FromRequestParts;
use axum::http::Request;

fn parts(authorization: Option<&str>) -> axum::http::request::Parts {
    let mut builder = Request::builder().uri("/api/canvas");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(()).expect("request should build").into_parts().0
}

#[tokio::test]
async fn bearer_token_resolves_identity() {
    let (state, store) = test_helpers::test_app_state();
    store.register_token("tok-alice", "alice").await;

    let mut p = parts(Some("Bearer tok-alice"));
    let user = AuthUser::from_request_parts(&mut p, &state).await.ok().expect("authorized");
    assert_eq!(user.identity, "alice");
}

#[tokio::test]
async fn missing_or_unknown_token_is_unauthorized() {
    let (state, _) = test_helpers::test_app_state();
    for header in [None, Some("Bearer nope"), Some("Basic abc"), Some("Bearer ")] {
        let mut p = parts(header);
        let status = AuthUser::from_request_parts(&mut p, &state).await.err();
        assert_eq!(status, Some(StatusCode::UNAUTHORIZED), "header {header:?}");
    }
}

#[tokio::test]
async fn dev_session_is_hidden_by_default() {
    let (state, _) = test_helpers::test_app_state();
    let result = dev_session(State(state), Json(DevSessionBody { identity: "alice".into() })).await;
    assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn dev_session_issues_working_token() {
    let config = SyncConfig { dev_session_endpoint: true, ..SyncConfig::default() };
    let (state, _) = test_helpers::test_app_state_with(config);

    let Json(body) = dev_session(State(state.clone()), Json(DevSessionBody { identity: " alice ".into() }))
        .await
        .expect("issued");
    let token = body["token"].as_str().expect("token string");
    assert_eq!(state.identities.verify(token).await.expect("verify"), Some("alice".to_owned()));

    let empty = dev_session(State(state), Json(DevSessionBody { identity: "  ".into() })).await;
    assert_eq!(empty.err(), Some(StatusCode::BAD_REQUEST));
}
