//! `careguard check`: configuration and component health

use crate::loader::load_settings;
use anyhow::{Context, Result};
use careguard_core::{Toolkit, ToolkitSnapshot};
use tracing::info;

pub async fn run(json: bool) -> Result<()> {
    let settings = load_settings()?;
    let toolkit = Toolkit::from_settings(settings).context("Failed to build toolkit")?;

    smoke_test(&toolkit).await?;
    let snapshot = toolkit.snapshot();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
        );
        return Ok(());
    }

    print_report(&toolkit, &snapshot);
    Ok(())
}

/// Push one round of work through the shared components
async fn smoke_test(toolkit: &Toolkit) -> Result<()> {
    let cache = toolkit.cache::<String, String>()?;
    cache.set("careguard:check".to_string(), "ok".to_string());
    anyhow::ensure!(
        cache.get(&"careguard:check".to_string()).as_deref() == Some("ok"),
        "Cache did not return the value just stored"
    );

    let probes = toolkit.breakers().names().into_iter().map(|name| async move {
        let breaker = toolkit.breaker(&name);
        toolkit
            .adaptive_timeout()
            .execute(async { breaker.state() })
            .await
            .map(|state| (name, state))
    });
    let states = toolkit
        .batcher()
        .batch(probes)
        .await
        .context("Breaker probe batch failed")?;

    info!(breakers = states.len(), "Smoke test passed");
    Ok(())
}

fn print_report(toolkit: &Toolkit, snapshot: &ToolkitSnapshot) {
    let settings = toolkit.settings();

    println!("🛡️  Careguard Check\n");
    println!(
        "✅ Cache           max_size={} ttl={}s",
        settings.cache.max_size, settings.cache.default_ttl_secs
    );
    println!(
        "✅ Retry           attempts={} delay={}..{}ms x{}",
        settings.retry.max_attempts,
        settings.retry.initial_delay_ms,
        settings.retry.max_delay_ms,
        settings.retry.backoff_multiplier
    );
    println!(
        "✅ Batcher         max_concurrent={} timeout={}",
        settings.batcher.max_concurrent,
        settings
            .batcher
            .timeout_ms
            .map_or_else(|| "none".to_string(), |ms| format!("{ms}ms"))
    );
    println!(
        "✅ Adaptive        p{} current={:.0}ms",
        settings.adaptive_timeout.percentile, snapshot.adaptive_timeout.current_timeout_ms
    );
    println!(
        "✅ Pool            max_size={} acquire_timeout={}ms",
        settings.pool.max_size, settings.pool.acquire_timeout_ms
    );

    println!("\nCircuit breakers:");
    if snapshot.breakers.is_empty() {
        println!("  (none registered)");
    }
    for breaker in &snapshot.breakers {
        println!(
            "  {:<20} {:<9} failures={} calls={}",
            breaker.name,
            breaker.state.to_string(),
            breaker.failure_count,
            breaker.total_calls
        );
    }
}
