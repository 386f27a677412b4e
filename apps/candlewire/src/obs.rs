//! Process-wide tracing and metrics bootstrap, done once before any command
//! runs.

use std::net::SocketAddr;

pub fn init_tracing() -> Result<(), String> {
    let filter = std::env::var("CANDLEWIRE_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    Ok(())
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(flag_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let raw = match flag_addr {
        Some(addr) => addr.to_string(),
        None => match std::env::var("CANDLEWIRE_METRICS_ADDR").ok() {
            Some(raw) => raw,
            None => return Ok(None),
        },
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let addr: SocketAddr = raw
        .parse()
        .map_err(|err| format!("invalid metrics address (expected host:port): {err}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_flag_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    Ok(None)
}
