use tracing_subscriber::EnvFilter;

/// Install the global subscriber for the REPL.
///
/// `RUST_LOG` wins over `default_filter`. Output goes to stderr so log lines
/// never interleave with table output on stdout. Fails if a subscriber is
/// already installed or the filter does not parse.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(default_filter)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing already initialised: {e}"))
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!(port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("startrade_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // Other tests may have claimed the global slot first; either way the
        // second call must report it rather than panic.
        let _ = init_tracing("startrade_rs=debug");
        assert!(init_tracing("startrade_rs=debug").is_err());
    }
}
