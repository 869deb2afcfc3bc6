//! End-to-end walkthrough: warm the pool, gate requests per identity,
//! serve queries through the cache, and print the aggregated health report.
//!
//! Run with `cargo run --example resource_demo`.

use resman::executor::PreloadQuery;
use resman::limiter::LimiterConfig;
use resman::pool::{MemoryStore, PoolConfig};
use resman::service::{ResourceConfig, ResourceManager};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> resman::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resman=debug".into()),
        )
        .init();

    let store = MemoryStore::new()
        .with_rows(
            "SELECT * FROM api_keys WHERE provider = ?",
            vec![json!({"provider": "openrouter", "key_value": "sk-demo"})],
        )
        .with_rows(
            "SELECT * FROM companies",
            vec![
                json!({"id": 1, "name": "Rapid Freight LLC", "usdot": "1234567"}),
                json!({"id": 2, "name": "Summit Haulers", "usdot": "7654321"}),
            ],
        )
        .with_latency(Duration::from_millis(20));

    let manager = ResourceManager::new(
        ResourceConfig::new()
            .with_pool(PoolConfig::new().with_max_connections(4))
            .with_limiter(LimiterConfig::new().with_ai_limit(3)),
        Box::new(store),
    );
    manager.start();

    let preloaded = manager
        .warm(&[PreloadQuery {
            sql: "SELECT * FROM api_keys WHERE provider = ?".into(),
            params: vec![json!("openrouter")],
            ttl: Some(Duration::from_secs(3600)),
        }])
        .await?;
    println!("preloaded {preloaded} statement(s)");

    // A user asks the same question twice; the second answer is memoized.
    let user = "dispatcher-1";
    for attempt in 1..=2 {
        let decision = manager.admit_ai_request(user);
        if !decision.allowed {
            println!("attempt {attempt}: denied ({:?})", decision.reason);
            continue;
        }
        match manager.cached_answer::<String>(user, "list active carriers") {
            Some(answer) => println!("attempt {attempt}: cached answer: {answer}"),
            None => {
                let rows = manager
                    .executor()
                    .execute_with_cache("SELECT * FROM companies", &[], None)
                    .await?;
                let answer = format!("{} active carriers on file", rows.len());
                manager.store_answer(user, "list active carriers", &answer, None)?;
                println!("attempt {attempt}: computed answer: {answer}");
            }
        }
    }

    // A noisy identity trips the AI ceiling.
    for _ in 0..8 {
        manager.admit_ai_request("scraper-9000");
    }
    let status = manager.limiter().status("scraper-9000");
    println!("scraper-9000 blocked: {}", status.blocked);

    let health = manager.health_check();
    println!("{}", serde_json::to_string_pretty(&health)?);

    manager.close();
    Ok(())
}
