use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    pub static ref RATE_LIMIT_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "blog_rate_limit_decisions_total",
        "Rate limit decisions by scope and outcome",
        &["scope", "outcome"]
    )
    .unwrap();
    pub static ref RATE_LIMIT_STORE_ERRORS: IntCounter = register_int_counter!(
        "blog_rate_limit_store_errors_total",
        "Counter store failures that were allowed through (fail open)"
    )
    .unwrap();
    pub static ref LOGIN_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "blog_login_attempts_total",
        "Credential checks by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref GATE_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "blog_gate_decisions_total",
        "Access gate decisions",
        &["decision"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "blog_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
}

// Render every registered metric in the prometheus text format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_contains_touched_metrics() {
        GATE_DECISIONS.with_label_values(&["allow"]).inc();
        let text = render().unwrap();
        assert!(text.contains("blog_gate_decisions_total"));
    }
}
