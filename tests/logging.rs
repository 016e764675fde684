use std::sync::Arc;
use std::{env, fs};

use winauth::adapter::MemoryAdapter;
use winauth::logging::{setup_logger, WINAUTH_LOG_LEVEL_ENV, WINAUTH_LOG_PATH_ENV};
use winauth::{AuthProvider, ProviderConfig, Secret};

// The logger is process-global, so this binary holds a single test.
#[test]
fn logger_writes_to_configured_file_without_secrets() {
    let path = env::temp_dir().join(format!("winauth-{}.log", uuid::Uuid::new_v4()));
    env::set_var(WINAUTH_LOG_PATH_ENV, &path);
    env::set_var(WINAUTH_LOG_LEVEL_ENV, "winauth=debug");

    setup_logger();
    setup_logger();

    let adapter = MemoryAdapter::builder().local_user("carol", "Carol-Passw0rd").build();
    let provider = AuthProvider::new(Arc::new(adapter), ProviderConfig::default());
    provider
        .logon_local_user("carol", &Secret::from("Carol-Passw0rd"))
        .unwrap();
    provider
        .logon_local_user("carol", &Secret::from("wrong-password"))
        .unwrap_err();

    let log = fs::read_to_string(&path).unwrap();
    fs::remove_file(&path).ok();

    assert!(log.contains("WORKSTATION\\carol"), "{log}");
    assert!(log.contains("WARN"), "{log}");
    assert!(!log.contains("Carol-Passw0rd"));
    assert!(!log.contains("wrong-password"));
}
