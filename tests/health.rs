//! End-to-end health-prober behavior.

mod common;

use std::time::Duration;

use common::{http_client, spawn_app, test_config, MockBackend};

#[tokio::test]
async fn failing_backend_is_evicted_and_restored() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;

    let config = test_config(
        "round-robin",
        vec![a.backend_config(0), b.backend_config(0)],
    );
    let app = spawn_app(config).await;
    let client = http_client();

    // Both serve initially.
    for _ in 0..6 {
        client.get(&app.url).send().await.expect("proxy unreachable");
    }
    assert!(a.hit_count() > 0);
    assert!(b.hit_count() > 0);

    // b starts failing its probe; the next sweeps evict it.
    b.set_healthy(false);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let a_before = a.hit_count();
    for _ in 0..10 {
        let body = client
            .get(&app.url)
            .send()
            .await
            .expect("proxy unreachable")
            .text()
            .await
            .unwrap();
        assert_eq!(body, "a");
    }
    assert_eq!(a.hit_count(), a_before + 10);

    // Recovery brings b back into rotation.
    b.set_healthy(true);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let b_before = b.hit_count();
    for _ in 0..6 {
        client.get(&app.url).send().await.unwrap();
    }
    assert!(b.hit_count() > b_before, "b never rejoined the rotation");

    app.shutdown.trigger();
}

#[tokio::test]
async fn losing_every_backend_is_fatal() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let c = MockBackend::start("c").await;

    let config = test_config(
        "round-robin",
        vec![a.backend_config(0), b.backend_config(0), c.backend_config(0)],
    );
    let app = spawn_app(config).await;

    a.set_healthy(false);
    b.set_healthy(false);
    c.set_healthy(false);

    // The sweep that removes the last backend escalates to a fatal
    // condition and the run loop exits with an error.
    let result = tokio::time::timeout(Duration::from_secs(10), app.handle)
        .await
        .expect("run loop did not exit after losing every backend")
        .expect("run loop panicked");

    let err = result.expect_err("all-backends-down must surface as an error");
    assert!(err.to_string().contains("all backends are down"));
}

#[tokio::test]
async fn backend_dead_at_startup_is_omitted() {
    let a = MockBackend::start("a").await;
    let dead = MockBackend::start("dead").await;
    dead.stop();

    let config = test_config(
        "round-robin",
        vec![a.backend_config(0), dead.backend_config(0)],
    );
    let app = spawn_app(config).await;
    let client = http_client();

    for _ in 0..6 {
        let body = client
            .get(&app.url)
            .send()
            .await
            .expect("proxy unreachable")
            .text()
            .await
            .unwrap();
        assert_eq!(body, "a");
    }

    app.shutdown.trigger();
}

#[tokio::test]
async fn zero_live_backends_refuse_startup() {
    let dead = MockBackend::start("dead").await;
    dead.stop();

    let config = test_config("round-robin", vec![dead.backend_config(0)]);
    let err = baton::Application::build(config)
        .await
        .err()
        .expect("startup must fail with no live backends");
    assert!(err.to_string().contains("no available backends"));
}
