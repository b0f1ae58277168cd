use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

pub trait Metrics {
    fn register() -> Self;
}

pub fn register_gauge_metric_instrument(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Gauge<f64> {
    crate_meter.f64_gauge(instrument_name).with_description(desc).with_unit(unit).build()
}

pub fn register_counter_metric_instrument(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Counter<u64> {
    crate_meter.u64_counter(instrument_name).with_description(desc).with_unit(unit).build()
}

pub fn register_histogram_metric_instrument(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Histogram<f64> {
    crate_meter.f64_histogram(instrument_name).with_description(desc).with_unit(unit).build()
}
