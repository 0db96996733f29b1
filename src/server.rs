use axum::{
    Router, routing::{delete, get, post},
};
use tower_http::{
    compression::CompressionLayer,
    trace::TraceLayer,
};
use anyhow::Context;
use tracing::info;
use crate::{
    api::handler::{
        AppState, add_members, create_assignment, create_group, get_group, health_check,
        latest_audit, reconcile, remove_member, run_audit, unassign_content, update_group,
    },
    middleware::create_cors_layer,
};

pub async fn create_app(state: AppState, cors_allowed_origins: &[String]) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/api/v1",
            Router::new()
                // Groups and membership
                .route("/groups", post(create_group))
                .route("/groups/:id", get(get_group).patch(update_group))
                .route("/groups/:id/members", post(add_members))
                .route("/groups/:id/members/:student_id", delete(remove_member))

                // Bulk assignment
                .route("/groups/:id/assignments", post(create_assignment))
                .route("/groups/:id/assignments/:assignment_id", delete(unassign_content))

                // Consistency
                .route("/groups/:id/audit", get(run_audit))
                .route("/groups/:id/audit/latest", get(latest_audit))
                .route("/groups/:id/reconcile", post(reconcile))
        )
        .layer(CompressionLayer::new())
        .layer(create_cors_layer(cors_allowed_origins))
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_state;
    use crate::config::{AuditConfig, Config, DbConfig, StoreBackend};
    use crate::store::models::NewGroup;
    use crate::store::{MemoryStore, SyncStore};
    use crate::sync::primitive::fixtures::seed_full_week;
    use crate::sync::SyncConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            bind_address: "127.0.0.1:0".to_string(),
            store_backend: StoreBackend::Memory,
            cors_allowed_origins: vec![],
            audit: AuditConfig {
                initial_delay_ms: 5,
                mutation_delay_ms: 5,
                report_retention_secs: 60,
            },
            sync: SyncConfig::default(),
            db: DbConfig { max_connections: 1 },
        }
    }

    async fn app_with_group() -> (Router, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let group = store
            .create_group(NewGroup {
                name: "Evening runners".to_string(),
                description: None,
                objective: Some("10k".to_string()),
                course_start: None,
                course_end: None,
            })
            .await
            .unwrap();
        let state = build_state(store.clone(), &test_config());
        (create_app(state, &[]).await, store, group.id)
    }

    fn request(method: &str, uri: String, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", Uuid::new_v4().to_string());
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = app_with_group().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["store"], "memory");
    }

    #[tokio::test]
    async fn test_full_week_flow_over_http() {
        let (app, store, group_id) = app_with_group().await;
        let routine = seed_full_week(&store).await;
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/members", group_id),
                Some(json!({ "student_ids": [a, b] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/assignments", group_id),
                Some(json!({ "kind": "routine-full-week", "content_id": routine })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["report"]["status"], "complete");
        assert_eq!(body["message"], "Assigned to 2 members");

        app.clone()
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/members", group_id),
                Some(json!({ "student_ids": [c] })),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", format!("/api/v1/groups/{}/audit", group_id), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["report"]["consistent"], false);
        assert_eq!(body["report"]["discrepancies"][0]["missing"][0]["student_id"], json!(c));

        let response = app
            .clone()
            .oneshot(request("POST", format!("/api/v1/groups/{}/reconcile", group_id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["audit"]["consistent"], true);
        assert_eq!(body["message"], "1 succeeded, 0 failed");
        assert_eq!(store.day_rows(c).await.len(), 7);

        let response = app
            .oneshot(request("GET", format!("/api/v1/groups/{}/audit/latest", group_id), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["report"]["consistent"], true);
    }

    #[tokio::test]
    async fn test_dispatch_to_empty_group_is_rejected() {
        let (app, store, group_id) = app_with_group().await;
        let response = app
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/assignments", group_id),
                Some(json!({ "kind": "course", "content_id": Uuid::new_v4() })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error_code"], "VALIDATION_FAILED");
        assert!(store.list_content_assignments(group_id, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_and_missing_user() {
        let (app, _, group_id) = app_with_group().await;

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/assignments", group_id),
                Some(json!({ "kind": "course", "content_id": Uuid::nil() })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/groups/{}/reconcile", group_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_group_write_failure_surfaces_message() {
        let (app, store, group_id) = app_with_group().await;
        store.insert_membership(group_id, Uuid::new_v4()).await.unwrap();
        store.fail_group_writes(true);

        let response = app
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/assignments", group_id),
                Some(json!({ "kind": "diet", "content_id": Uuid::new_v4() })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(response).await["error_code"], "GROUP_ASSIGNMENT_FAILED");
    }

    #[tokio::test]
    async fn test_unknown_group_and_missing_audit() {
        let (app, _, group_id) = app_with_group().await;

        let response = app
            .clone()
            .oneshot(request("GET", format!("/api/v1/groups/{}", Uuid::new_v4()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("GET", format!("/api/v1/groups/{}/audit/latest", group_id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_and_update_group_over_http() {
        let (app, store, _) = app_with_group().await;

        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/groups".to_string(), Some(json!({ "name": "" }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/groups".to_string(),
                Some(json!({
                    "name": "Weekend hikers",
                    "course_start": "2026-04-01",
                    "course_end": "2026-06-30",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let group_id: Uuid = serde_json::from_value(body["group"]["id"].clone()).unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                format!("/api/v1/groups/{}", group_id),
                Some(json!({ "objective": "Summit in June" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = store.get_group(group_id).await.unwrap();
        assert_eq!(stored.name, "Weekend hikers");
        assert_eq!(stored.objective.as_deref(), Some("Summit in June"));

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                format!("/api/v1/groups/{}", group_id),
                Some(json!({ "course_end": "2026-03-01" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                "PATCH",
                format!("/api/v1/groups/{}", Uuid::new_v4()),
                Some(json!({ "name": "Nobody" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unassign_superseded_assignment_is_not_found() {
        let (app, store, group_id) = app_with_group().await;
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        store.insert_membership(group_id, student).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request(
                    "POST",
                    format!("/api/v1/groups/{}/assignments", group_id),
                    Some(json!({ "kind": "course", "content_id": course })),
                ))
                .await
                .unwrap();
            let body = json_body(response).await;
            ids.push(body["report"]["group_assignment_id"].clone());
        }

        let response = app
            .oneshot(request(
                "DELETE",
                format!(
                    "/api/v1/groups/{}/assignments/{}",
                    group_id,
                    ids[0].as_str().unwrap()
                ),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(store.find_active_course_access(student, course).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_member_with_cleanup() {
        let (app, store, group_id) = app_with_group().await;
        let student = Uuid::new_v4();
        let course = Uuid::new_v4();
        store.insert_membership(group_id, student).await.unwrap();

        app.clone()
            .oneshot(request(
                "POST",
                format!("/api/v1/groups/{}/assignments", group_id),
                Some(json!({ "kind": "course", "content_id": course })),
            ))
            .await
            .unwrap();
        assert_eq!(store.course_rows(student, course).await.len(), 1);

        let response = app
            .oneshot(request(
                "DELETE",
                format!("/api/v1/groups/{}/members/{}?cleanup=true", group_id, student),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["course_grants_revoked"], 1);
        assert!(store.find_active_course_access(student, course).await.unwrap().is_none());
    }
}
