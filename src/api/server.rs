use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::events::EventBus;
use crate::scheduler::Scheduler;
use crate::supervisor::SupervisorRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: SupervisorRegistry,
    pub scheduler: Arc<Scheduler>,
    pub events: EventBus,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/:name", get(handlers::get_agent))
        .route("/agents/:name/start", post(handlers::start_agent))
        .route("/agents/:name/stop", post(handlers::stop_agent))
        .route("/agents/:name/pause", post(handlers::toggle_pause))
        .route("/agents/:name/schedule", get(handlers::get_schedule))
        .route("/agents/:name/history", get(handlers::get_history))
        .route("/events", get(handlers::stream_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("overseer api listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::{AgentConfig, Config, SharedConfig};
    use crate::events::NotificationSink;
    use crate::scheduler::HistoryEntry;
    use crate::services::{AgentFactory, AgentParts, BuildOptions};
    use crate::storage::{InMemoryScheduleStore, ScheduleStore};
    use crate::supervisor::AgentControl;

    struct NoClients;

    #[async_trait]
    impl AgentFactory for NoClients {
        async fn build(
            &self,
            name: &str,
            _config: &AgentConfig,
            _opts: BuildOptions,
        ) -> Result<AgentParts> {
            bail!("no client available for {}", name)
        }
    }

    async fn create_test_app() -> (Router, Arc<InMemoryScheduleStore>) {
        let mut night = AgentConfig::default();
        night.scheduler.enabled = true;
        // A one-minute window a little ahead keeps "night" outside it.
        let now = chrono::Local::now();
        night.scheduler.simple_start_time = (now + chrono::Duration::minutes(2)).format("%H:%M").to_string();
        night.scheduler.simple_stop_time = (now + chrono::Duration::minutes(3)).format("%H:%M").to_string();

        let mut config = Config::default();
        config.agents.insert("alpha".to_string(), AgentConfig::default());
        config.agents.insert("night".to_string(), night);
        let config: SharedConfig = config.shared();

        let events = EventBus::default();
        let registry = SupervisorRegistry::new(
            config.clone(),
            Arc::new(NoClients),
            Arc::new(events.clone()) as Arc<dyn NotificationSink>,
        );
        let store = Arc::new(InMemoryScheduleStore::new());
        let scheduler = Scheduler::new(
            config,
            Arc::new(registry.clone()) as Arc<dyn AgentControl>,
            store.clone() as Arc<dyn ScheduleStore>,
        )
        .await;

        let state = AppState {
            registry,
            scheduler: Arc::new(scheduler),
            events,
        };
        (create_router(state), store)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_list_agents() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        let agents = json.as_array().unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0]["name"], "alpha");
        assert_eq!(agents[0]["stats"]["status"], "NotStarted");
        assert_eq!(agents[0]["within_schedule"], true);
        assert_eq!(agents[1]["within_schedule"], false);
    }

    #[tokio::test]
    async fn test_unknown_agent_not_found() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/agents/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["code"], "not_found");
    }

    #[tokio::test]
    async fn test_start_outside_window_is_refused() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/night/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = json_body(response).await;
        assert_eq!(json["code"], "outside_schedule");
        assert!(json["next_window_start"].is_string());
    }

    #[tokio::test]
    async fn test_forced_start_is_accepted() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/night/start")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"force": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        assert_eq!(json["status"], "starting");
    }

    #[tokio::test]
    async fn test_pause_requires_running_agent() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/alpha/pause")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_schedule_summary() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/agents/night/schedule")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["mode"], "simple");
        assert_eq!(json["enabled"], true);
        assert_eq!(json["within_schedule"], false);
    }

    #[tokio::test]
    async fn test_history() {
        let (app, store) = create_test_app().await;
        store
            .record_history(
                "alpha",
                HistoryEntry {
                    date: "2026-06-09".to_string(),
                    wake_time: "08:00".to_string(),
                    sleep_time: "16:40".to_string(),
                    total_play_minutes: 470,
                    total_break_minutes: 40,
                    breaks: Vec::new(),
                },
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/agents/alpha/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["history"][0]["date"], "2026-06-09");
        assert_eq!(json["history"][0]["totalPlayMinutes"], 470);
    }
}
