// Concurrency: breaker bookkeeping and shared clients under parallel load
// Run with: cargo test --test performance

#[cfg(test)]
mod tests {
    use crate::test_utils::{breaker, client_with, settings};
    use analysis_bridge::models::{CallContext, Request};
    use analysis_bridge::resilience::{BreakerSettings, CircuitBreaker, CircuitOpen, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::Barrier;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    enum LoadError {
        Rejected,
        Failed,
    }

    impl From<CircuitOpen> for LoadError {
        fn from(_: CircuitOpen) -> Self {
            LoadError::Rejected
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_are_all_counted() {
        let cb = Arc::new(CircuitBreaker::new(
            "load",
            BreakerSettings {
                failure_threshold: 10_000,
                ..BreakerSettings::default()
            },
        ));
        let tasks = 400;
        let barrier = Arc::new(Barrier::new(tasks));
        let mut handles = Vec::with_capacity(tasks);

        for i in 0..tasks {
            let cb = Arc::clone(&cb);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cb.call(async move {
                    tokio::task::yield_now().await;
                    if i % 2 == 0 {
                        Ok(())
                    } else {
                        Err(LoadError::Failed)
                    }
                })
                .await
            }));
        }

        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let counts = cb.counts();
        assert_eq!(counts.requests, 400);
        assert_eq!(counts.total_successes, 200);
        assert_eq!(counts.total_failures, 200);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_trip_breaker() {
        let cb = Arc::new(CircuitBreaker::new(
            "trip",
            BreakerSettings {
                failure_threshold: 50,
                timeout: Duration::from_secs(60),
                ..BreakerSettings::default()
            },
        ));
        let barrier = Arc::new(Barrier::new(200));
        let executed = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..200 {
            let cb = Arc::clone(&cb);
            let barrier = Arc::clone(&barrier);
            let executed = Arc::clone(&executed);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cb.call(async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(LoadError::Failed)
                })
                .await
            }));
        }

        let mut rejected = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Err(LoadError::Rejected)) {
                rejected += 1;
            }
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(executed.load(Ordering::SeqCst) + rejected, 200);
        assert!(executed.load(Ordering::SeqCst) >= 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_half_open_limits_concurrent_probes() {
        let cb = Arc::new(CircuitBreaker::new(
            "probe",
            BreakerSettings {
                failure_threshold: 1,
                timeout: Duration::from_millis(50),
                success_threshold: 2,
                half_open_max_probes: 2,
                interval: None,
            },
        ));
        let _ = cb.call(async { Err::<(), _>(LoadError::Failed) }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let admitted = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            let admitted = Arc::clone(&admitted);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cb.call(async move {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<(), LoadError>(())
                })
                .await
            }));
        }

        let mut rejected = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Err(LoadError::Rejected)) {
                rejected += 1;
            }
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 2);
        assert_eq!(rejected, 8);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_client_under_load() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ok")
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(100)
            .mount(&server)
            .await;

        let mut client_settings = settings(&server.uri(), 1);
        client_settings.breaker = breaker(5, Duration::from_secs(30));
        let client = Arc::new(client_with("llm", client_settings));

        let start = Instant::now();
        let mut handles = Vec::new();
        for i in 0..100 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let request = Request::get(format!("/v1/items/{i}")).build().unwrap();
                client.execute_request(&CallContext::new(), request).await
            }));
        }

        let mut success_count = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                success_count += 1;
            }
        }
        let duration = start.elapsed();

        eprintln!("Shared client load test results:");
        eprintln!("  Successful: {}", success_count);
        eprintln!("  Duration: {:?}", duration);

        assert_eq!(success_count, 100);
        let stats = client.metrics().get_stats().await;
        assert_eq!(stats.total_calls, 100);
        assert_eq!(stats.retries, 0);
        assert!(stats.p99_latency_ms >= stats.p50_latency_ms);
        assert_eq!(client.breaker().counts().total_successes, 100);
    }
}
