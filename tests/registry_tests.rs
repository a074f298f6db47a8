//! Registry start/stop and restart policy against mock agents.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use common::{fast_agent, fast_config, wait_until, within, MenuStep, MockFactory, Outcome};
use overseer::config::{AuthMethod, SharedConfig};
use overseer::error::RegistryError;
use overseer::events::EventBus;
use overseer::supervisor::SupervisorRegistry;
use overseer::types::{ExecutionPriority, SupervisorStatus};

const WAIT: Duration = Duration::from_secs(3);

fn registry(agents: &[&str], factory: Arc<MockFactory>) -> SupervisorRegistry {
    SupervisorRegistry::new(fast_config(agents), factory, Arc::new(EventBus::default()))
}

#[tokio::test]
async fn test_status_of_unknown_agent_is_not_started() {
    let registry = registry(&["alpha"], Arc::new(MockFactory::new()));
    let stats = registry.status("ghost");
    assert_eq!(stats.status, SupervisorStatus::NotStarted);
    assert!(!stats.is_running());
    assert!(registry.registered().is_empty());
    assert_eq!(registry.available(), vec!["alpha".to_string()]);
}

#[tokio::test]
async fn test_start_unconfigured_agent_fails() {
    let factory = Arc::new(MockFactory::new());
    let registry = registry(&["alpha"], factory.clone());
    let result = registry.start("ghost", false, false).await;
    assert!(matches!(result, Err(RegistryError::UnknownAgent(name)) if name == "ghost"));
    assert_eq!(factory.build_count("ghost"), 0);
}

#[tokio::test]
async fn test_concurrent_start_registers_once() {
    let factory = Arc::new(MockFactory::new().with_barrier(Arc::new(Barrier::new(2))));
    let registry = registry(&["alpha"], factory.clone());

    let first = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    let second = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };

    assert!(wait_until(WAIT, || registry.registered() == vec!["alpha".to_string()]).await);
    // Let the loser return before stopping the winner.
    tokio::time::sleep(Duration::from_millis(50)).await;
    registry.stop("alpha").await;

    let results = vec![
        within(WAIT, first).await.unwrap(),
        within(WAIT, second).await.unwrap(),
    ];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(RegistryError::AlreadyRunning(name)) if name == "alpha"))
        .count();
    assert_eq!((ok, rejected), (1, 1));
    assert_eq!(factory.build_count("alpha"), 2);

    // The discarded duplicate client was killed.
    let killed = factory
        .processes
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, p)| p.kills.load(Ordering::SeqCst) > 0)
        .count();
    assert!(killed >= 1);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let factory = Arc::new(MockFactory::new());
    let registry = registry(&["alpha"], factory.clone());

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);

    let again = registry.start("alpha", false, false).await;
    assert!(matches!(again, Err(RegistryError::AlreadyRunning(_))));

    registry.stop("alpha").await;
    assert!(within(WAIT, running).await.unwrap().is_ok());
    assert!(registry.registered().is_empty());
    assert_eq!(registry.status("alpha").status, SupervisorStatus::NotStarted);
}

#[tokio::test]
async fn test_running_agent_reports_sessions() {
    let factory = Arc::new(MockFactory::new());
    let registry = registry(&["alpha"], factory.clone());

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").sessions_started >= 2).await);

    let stats = registry.status("alpha");
    assert!(stats.started_at.is_some());
    assert_eq!(stats.sessions_failed, 0);
    assert!(registry.context("alpha").is_some());

    registry.stop_all().await;
    assert!(within(WAIT, running).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_toggle_pause() {
    let factory = Arc::new(
        MockFactory::new().with_tasks("alpha", vec![("long", Outcome::Sleep(Duration::from_secs(30)))]),
    );
    let registry = registry(&["alpha"], factory.clone());
    assert_eq!(registry.toggle_pause("alpha"), None);

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || {
        registry
            .context("alpha")
            .is_some_and(|r| r.priority().get() == ExecutionPriority::Normal)
    })
    .await);

    assert_eq!(registry.toggle_pause("alpha"), Some(true));
    let runtime = registry.context("alpha").unwrap();
    assert_eq!(runtime.priority().get(), ExecutionPriority::Pause);
    assert_eq!(registry.toggle_pause("alpha"), Some(false));
    assert_ne!(runtime.priority().get(), ExecutionPriority::Pause);

    registry.stop("alpha").await;
    assert!(within(WAIT, running).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_crash_restarts_agent() {
    let factory = Arc::new(MockFactory::new());
    let registry = registry(&["alpha"], factory.clone());

    let _running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || factory.build_count("alpha") == 1).await);
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);

    factory.last_process("alpha").unwrap().crash();

    assert!(wait_until(WAIT, || factory.build_count("alpha") == 2).await);
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);
    assert_eq!(registry.registered(), vec!["alpha".to_string()]);

    registry.stop_all().await;
    assert!(registry.registered().is_empty());
}

#[tokio::test]
async fn test_clean_stop_without_next_does_not_restart() {
    let factory = Arc::new(
        MockFactory::new().with_tasks("alpha", vec![("done", Outcome::HandOver(None))]),
    );
    let registry = registry(&["alpha"], factory.clone());

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(within(WAIT, running).await.unwrap().is_ok());
    assert!(wait_until(WAIT, || registry.registered().is_empty()).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(factory.build_count("alpha"), 1);
    assert!(registry.registered().is_empty());
}

#[tokio::test]
async fn test_clean_stop_hands_over_to_next_agent() {
    let factory = Arc::new(
        MockFactory::new().with_tasks("alpha", vec![("done", Outcome::HandOver(Some("bravo".to_string())))]),
    );
    let registry = registry(&["alpha", "bravo"], factory.clone());

    let _running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };

    assert!(wait_until(WAIT, || registry.registered() == vec!["bravo".to_string()]).await);
    assert_eq!(factory.build_count("alpha"), 1);
    assert_eq!(factory.build_count("bravo"), 1);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_manual_mode_is_not_restarted() {
    let factory = Arc::new(MockFactory::new());
    let registry = registry(&["alpha"], factory.clone());

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, true).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").status == SupervisorStatus::Running).await);
    let opts = factory.builds.lock().unwrap()[0].1;
    assert!(opts.manual_mode);
    assert_eq!(registry.status("alpha").sessions_started, 0);

    factory.last_process("alpha").unwrap().crash();

    assert!(within(WAIT, running).await.unwrap().is_ok());
    assert!(wait_until(WAIT, || registry.registered().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(factory.build_count("alpha"), 1);
}

fn token_config(agents: &[&str]) -> SharedConfig {
    let config = fast_config(agents);
    {
        let mut guard = config.write().unwrap();
        for name in agents {
            let mut agent = fast_agent();
            agent.auth_method = AuthMethod::Token;
            guard.agents.insert(name.to_string(), agent);
        }
    }
    config
}

#[tokio::test]
async fn test_token_auth_restart_waits_for_starting_client() {
    // bravo never gets past the menus, so it stays Starting.
    let factory = Arc::new(MockFactory::new().with_menu("bravo", &[MenuStep::Hang]));
    let registry = SupervisorRegistry::new(
        token_config(&["alpha", "bravo"]),
        factory.clone(),
        Arc::new(EventBus::default()),
    );

    let _alpha = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);

    let bravo = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("bravo", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("bravo").status == SupervisorStatus::Starting).await);

    factory.last_process("alpha").unwrap().crash();
    assert!(wait_until(WAIT, || !registry.registered().contains(&"alpha".to_string())).await);

    // Held back while bravo is logging in.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(factory.build_count("alpha"), 1);
    assert_eq!(registry.status("bravo").status, SupervisorStatus::Starting);

    registry.stop("bravo").await;
    assert!(within(WAIT, bravo).await.unwrap().is_ok());

    assert!(wait_until(WAIT, || factory.build_count("alpha") == 2).await);
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_restart_without_token_auth_does_not_wait() {
    let factory = Arc::new(MockFactory::new().with_menu("bravo", &[MenuStep::Hang]));
    let registry = registry(&["alpha", "bravo"], factory.clone());

    let _alpha = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").is_running()).await);
    let _bravo = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("bravo", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("bravo").status == SupervisorStatus::Starting).await);

    factory.last_process("alpha").unwrap().crash();
    assert!(wait_until(WAIT, || factory.build_count("alpha") == 2).await);
    assert_eq!(registry.status("bravo").status, SupervisorStatus::Starting);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_pause_during_menus_is_applied() {
    let factory = Arc::new(MockFactory::new().with_menu("alpha", &[MenuStep::Hang]));
    let registry = registry(&["alpha"], factory.clone());

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.start("alpha", false, false).await })
    };
    assert!(wait_until(WAIT, || registry.status("alpha").status == SupervisorStatus::Starting).await);

    assert_eq!(registry.toggle_pause("alpha"), Some(true));
    let stats = registry.status("alpha");
    assert_eq!(stats.status, SupervisorStatus::Paused);
    assert_eq!(stats.priority, Some(ExecutionPriority::Pause));
    assert_eq!(registry.toggle_pause("alpha"), Some(false));

    registry.stop("alpha").await;
    assert!(within(WAIT, running).await.unwrap().is_ok());
}
