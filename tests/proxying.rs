//! End-to-end proxying behavior: rotation, header rewriting, error
//! synthesis, and the stats surface.

mod common;

use common::{http_client, spawn_app, test_config, MockBackend};

#[tokio::test]
async fn round_robin_cycles_across_three_backends() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let c = MockBackend::start("c").await;

    let config = test_config(
        "round-robin",
        vec![a.backend_config(0), b.backend_config(0), c.backend_config(0)],
    );
    let app = spawn_app(config).await;
    let client = http_client();

    let mut bodies = Vec::new();
    for _ in 0..6 {
        let body = client
            .get(&app.url)
            .send()
            .await
            .expect("proxy unreachable")
            .text()
            .await
            .unwrap();
        bodies.push(body);
    }

    assert_eq!(bodies, vec!["a", "b", "c", "a", "b", "c"]);
    assert_eq!(a.hit_count(), 2);
    assert_eq!(b.hit_count(), 2);
    assert_eq!(c.hit_count(), 2);

    // Graceful shutdown completes cleanly: the frontend drains and the
    // prober stops.
    app.shutdown.trigger();
    tokio::time::timeout(std::time::Duration::from_secs(5), app.handle)
        .await
        .expect("shutdown timed out")
        .expect("run loop panicked")
        .expect("run loop returned an error");
}

#[tokio::test]
async fn forwarded_request_is_rewritten() {
    let a = MockBackend::start("a").await;
    let mut config = test_config("round-robin", vec![a.backend_config(0)]);
    config
        .custom_headers
        .insert("X-Origin-Id".into(), "$uuid".into());
    config
        .custom_headers
        .insert("X-Env".into(), "integration".into());

    let app = spawn_app(config).await;
    let client = http_client();

    let response = client
        .get(format!("{}/echo", app.url))
        .header("X-Probe", "1")
        .send()
        .await
        .expect("proxy unreachable");
    assert_eq!(response.status(), 200);

    let seen = a.last_headers.lock().unwrap().clone();

    // Host pinned to the backend, client address recorded.
    assert_eq!(seen.get("host").unwrap(), &a.addr.to_string());
    assert_eq!(seen.get("x-forwarded-for").unwrap(), "127.0.0.1");

    // None of the hop-by-hop headers crossed the proxy.
    for name in [
        "connection",
        "proxy-connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        assert!(!seen.contains_key(name), "{} leaked through", name);
    }

    // Custom headers substituted and appended.
    assert_eq!(seen.get("x-origin-id").unwrap().len(), 36);
    assert_eq!(seen.get("x-env").unwrap(), "integration");
    assert_eq!(seen.get("x-probe").unwrap(), "1");

    app.shutdown.trigger();
}

#[tokio::test]
async fn dead_backend_yields_synthesized_500() {
    let a = MockBackend::start("a").await;
    let mut config = test_config("round-robin", vec![a.backend_config(0)]);
    // Keep the prober quiet so the request hits the dead socket.
    config.health_checker_time = 60;

    let app = spawn_app(config).await;
    let client = http_client();

    a.stop();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = client.get(&app.url).send().await.expect("proxy unreachable");
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("message").unwrap().is_string());

    app.shutdown.trigger();
}

#[tokio::test]
async fn stats_endpoint_reports_backends_in_config_order() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;

    let config = test_config(
        "round-robin",
        vec![a.backend_config(0), b.backend_config(0)],
    );
    let app = spawn_app(config).await;
    let client = http_client();

    for _ in 0..4 {
        client.get(&app.url).send().await.unwrap();
    }

    let report: serde_json::Value = client
        .get(format!("{}/stats", app.monitoring_url))
        .send()
        .await
        .expect("monitoring unreachable")
        .json()
        .await
        .unwrap();

    let process = report.get("process").unwrap();
    assert_eq!(process.get("policy").unwrap().as_str().unwrap(), "round-robin");
    assert_eq!(process.get("total_request_count").unwrap().as_u64().unwrap(), 4);
    assert_eq!(process.get("live_backends").unwrap().as_u64().unwrap(), 2);

    let backends = report.get("backends").unwrap().as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0].get("addr").unwrap().as_str().unwrap(), a.addr.to_string());
    assert_eq!(backends[1].get("addr").unwrap().as_str().unwrap(), b.addr.to_string());
    assert_eq!(backends[0].get("total_req_count").unwrap().as_u64().unwrap(), 2);
    assert_eq!(backends[1].get("total_req_count").unwrap().as_u64().unwrap(), 2);
    assert_eq!(backends[0].get("is_host_alive").unwrap().as_bool().unwrap(), true);

    app.shutdown.trigger();
}
