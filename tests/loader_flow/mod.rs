use std::time::Duration;

use d_confsync::ConfigLoader;
use d_confsync::MergePolicy;
use d_confsync::Session;
use d_confsync::Settings;
use tokio::time::timeout;

use crate::common::*;

fn billing_settings() -> Settings {
    Settings {
        service_name: "billing".to_string(),
        config_data: [("dbport".to_string(), "5432".to_string())].into(),
        reconnect: quick_policy(),
        ..Settings::default()
    }
}

#[tokio::test]
async fn test_store_follows_remote_replacements() {
    enable_logger();
    let backend = backend_with(&[
        ("/service/billing/db", r#"{"dbhost":"10.0.0.1"}"#),
        ("/shared/feature", r#"{"flag_a":"on","flag_b":"on"}"#),
        ("/service/billing", r#"["/shared/feature"]"#),
    ]);
    let session: Session = backend.clone();

    let mut loader = ConfigLoader::with_session(billing_settings(), session, MergePolicy::Replace).await;
    let store = loader.store().clone();
    let mut events = loader.subscribe();
    assert_eq!(store.get("dbhost", ""), "10.0.0.1");
    assert_eq!(store.get_int("dbport", 0), 5432);

    // Touch the service node so its list is resolved
    wait_until_armed(&backend, SERVICE_PATH).await;
    backend.put(SERVICE_PATH, r#"["/shared/feature"]"#);
    let event = timeout(Duration::from_secs(3), events.recv()).await.unwrap().unwrap();
    assert_eq!(event.path, "/shared/feature");
    assert_eq!(event.keys, vec!["flag_a".to_string(), "flag_b".to_string()]);

    wait_until_armed(&backend, SERVICE_PATH).await;
    backend.put("/shared/feature", r#"{"flag_a":"on"}"#);
    backend.put(SERVICE_PATH, r#"["/shared/feature"]"#);
    let event = timeout(Duration::from_secs(3), events.recv()).await.unwrap().unwrap();
    assert_eq!(event.keys, vec!["flag_b".to_string()]);

    assert!(store.get_bool("flag_a", false));
    assert!(!store.contains("flag_b"));
    loader.shutdown().await;
}
