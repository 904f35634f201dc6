use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

const LATENCY_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0,
];

/// Process-wide prediction counters, created once at startup and shared by handle.
#[derive(Clone)]
pub struct InferenceMetrics {
    registry: Registry,
    predictions: IntCounter,
    errors: IntCounter,
    latency: Histogram,
}

impl InferenceMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let predictions = IntCounter::new("predictions_total", "Total predictions made")?;
        let errors = IntCounter::new("model_errors_total", "Total model errors")?;
        let latency = Histogram::with_opts(
            HistogramOpts::new(
                "prediction_latency_seconds",
                "Time from prediction request to formatted result",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(predictions.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            predictions,
            errors,
            latency,
        })
    }

    pub fn record_prediction(&self) {
        self.predictions.inc();
    }

    pub fn record_error(&self) {
        self.errors.inc();
    }

    pub fn observe_latency(&self, seconds: f64) {
        self.latency.observe(seconds);
    }

    pub fn predictions_total(&self) -> u64 {
        self.predictions.get()
    }

    pub fn errors_total(&self) -> u64 {
        self.errors.get()
    }

    pub fn latency_samples(&self) -> u64 {
        self.latency.get_sample_count()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
