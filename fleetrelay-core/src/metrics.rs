//! Prometheus metrics for the relay
//!
//! Everything registers against [`REGISTRY`], which the HTTP layer exposes on `/metrics`.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Open dashboard websocket connections on this node
pub static DASHBOARD_CONNECTIONS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "dashboard_connections",
        "Current number of open dashboard websocket connections",
        REGISTRY.clone()
    ).expect("Failed to register DASHBOARD_CONNECTIONS")
});

/// Relay engine fan-out
pub mod relay {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    /// Events accepted by the relay, labelled by kind and route taken
    /// (`device`, `admin`, `global`, `command`, `dropped`)
    pub static EVENTS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "relay_events_total",
            "Total number of events routed by the relay",
            &["kind", "route"],
            REGISTRY.clone()
        ).expect("Failed to register relay EVENTS_TOTAL")
    });

    /// Admin batches flushed, labelled by destination room
    pub static BATCHES_FLUSHED: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "relay_batches_flushed_total",
            "Total number of admin batches flushed",
            &["room"],
            REGISTRY.clone()
        ).expect("Failed to register relay BATCHES_FLUSHED")
    });
}

/// Upstream adapters
pub mod adapters {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    /// Upstream events by source (`pg`, `alt`, `mqtt`) and outcome (`relayed`, `ignored`, `error`)
    pub static EVENTS_TOTAL: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "adapter_events_total",
            "Total number of upstream events handled by adapters",
            &["source", "outcome"],
            REGISTRY.clone()
        ).expect("Failed to register adapter EVENTS_TOTAL")
    });
}

/// Presence index backend
pub mod presence {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    pub static BACKEND_ERRORS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "presence_backend_errors_total",
            "Total number of presence backend failures",
            &["op"],
            REGISTRY.clone()
        ).expect("Failed to register presence BACKEND_ERRORS")
    });
}

/// Stale sweeper
pub mod sweeper {
    use super::{register_int_counter_with_registry, IntCounter, REGISTRY};

    pub static DEVICES_FLIPPED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "sweeper_devices_flipped_total",
            "Total number of devices marked offline by the stale sweeper",
            REGISTRY.clone()
        ).expect("Failed to register sweeper DEVICES_FLIPPED")
    });
}

/// Expose metrics in Prometheus format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
