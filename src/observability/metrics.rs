use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub acceptances_total: IntCounterVec,
    pub acceptance_latency_seconds: HistogramVec,
    pub order_transitions_total: IntCounterVec,
    pub otp_verifications_total: IntCounterVec,
    pub online_drivers: IntGauge,
    pub realtime_events_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let acceptances_total = IntCounterVec::new(
            Opts::new("acceptances_total", "Order acceptance attempts by outcome"),
            &["outcome"],
        )
        .expect("valid acceptances_total metric");

        let acceptance_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "acceptance_latency_seconds",
                "Latency of the acceptance unit of work in seconds",
            ),
            &["outcome"],
        )
        .expect("valid acceptance_latency_seconds metric");

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order transitions by status"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let otp_verifications_total = IntCounterVec::new(
            Opts::new("otp_verifications_total", "Code verifications by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("valid otp_verifications_total metric");

        let online_drivers = IntGauge::new("online_drivers", "Drivers in the online pool")
            .expect("valid online_drivers metric");

        let realtime_events_total = IntCounterVec::new(
            Opts::new("realtime_events_total", "Realtime events published by name"),
            &["event"],
        )
        .expect("valid realtime_events_total metric");

        registry
            .register(Box::new(acceptances_total.clone()))
            .expect("register acceptances_total");
        registry
            .register(Box::new(acceptance_latency_seconds.clone()))
            .expect("register acceptance_latency_seconds");
        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(otp_verifications_total.clone()))
            .expect("register otp_verifications_total");
        registry
            .register(Box::new(online_drivers.clone()))
            .expect("register online_drivers");
        registry
            .register(Box::new(realtime_events_total.clone()))
            .expect("register realtime_events_total");

        Self {
            registry,
            acceptances_total,
            acceptance_latency_seconds,
            order_transitions_total,
            otp_verifications_total,
            online_drivers,
            realtime_events_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
