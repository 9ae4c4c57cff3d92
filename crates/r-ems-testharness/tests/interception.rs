//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Construction interception isolation and miss handling tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::{Arc, Barrier};
use std::thread;

use r_ems_testharness::{
    AppHostBuilder, ConstructionInterceptor, HarnessError, HarnessSettings, HostOptions,
    HostSettings, MissPolicy, ScopeId, TestBuilder,
};

const ROUNDS: usize = 50;

fn capture_on_thread(label: &'static str, barrier: Arc<Barrier>) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..ROUNDS {
            let barrier = barrier.clone();
            let intercepted = ConstructionInterceptor::new()
                .run(
                    move || {
                        barrier.wait();
                        AppHostBuilder::create([format!("--env={label}")])
                    },
                    move |_options, settings| {
                        let captured = env_arg(settings);
                        settings.configuration.set("Probe:Owner", label);
                        if captured.as_deref() == Some(label) {
                            Ok(())
                        } else {
                            Err(format!("{label} captured {captured:?}"))
                        }
                    },
                )
                .unwrap_or_else(|err| panic!("interception failed: {err}"));
            assert!(intercepted.intercepted);
            seen.push(
                intercepted
                    .product
                    .configuration()
                    .get("Probe:Owner")
                    .unwrap_or_default()
                    .to_owned(),
            );
        }
        assert_eq!(ScopeId::current(), None);
        seen
    })
}

fn env_arg(settings: &HostSettings) -> Option<String> {
    settings
        .args
        .iter()
        .find_map(|arg| arg.strip_prefix("--env="))
        .map(str::to_owned)
}

#[test]
fn concurrent_interceptors_capture_only_their_own_construction() {
    let barrier = Arc::new(Barrier::new(2));
    let a = capture_on_thread("A", barrier.clone());
    let b = capture_on_thread("B", barrier);

    let seen_a = a.join().expect("thread A");
    let seen_b = b.join().expect("thread B");
    assert_eq!(seen_a, vec!["A".to_owned(); ROUNDS]);
    assert_eq!(seen_b, vec!["B".to_owned(); ROUNDS]);
}

fn silent_entry(options: HostOptions) -> AppHostBuilder {
    AppHostBuilder::from_parts(options, HostSettings::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missed_interception_fails_by_default() {
    let err = TestBuilder::options()
        .settings(HarnessSettings::default())
        .entry_point(silent_entry)
        .create()
        .await
        .expect_err("miss must fail");

    assert!(matches!(err, HarnessError::InterceptionMissed { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missed_interception_degrades_when_configured() {
    let settings = HarnessSettings {
        miss_policy: MissPolicy::Warn,
        ..HarnessSettings::default()
    };
    let builder = TestBuilder::options()
        .settings(settings)
        .entry_point(silent_entry)
        .create()
        .await
        .expect("miss tolerated");

    let configuration = builder.configuration().expect("configuration");
    assert!(!configuration.contains_key(r_ems_apphost::config::NAME_SUFFIX_KEY));
    let app = builder.build().await.expect("build with defaults");
    assert!(app.resources().is_empty());
    builder.dispose().await;
}
