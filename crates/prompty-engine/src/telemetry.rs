// SPDX-License-Identifier: Apache-2.0 OR MIT
#![cfg_attr(not(feature = "telemetry"), allow(dead_code))]

#[cfg(feature = "telemetry")]
mod otel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use std::time::Duration;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::trace::SpanKind;
    use opentelemetry::{trace::Span, trace::Tracer, KeyValue};

    const METER_NAME: &str = "prompty_engine";
    const TRACER_NAME: &str = "prompty_engine";

    static ENABLED: AtomicBool = AtomicBool::new(false);
    static HANDLES: OnceLock<Handles> = OnceLock::new();

    struct Handles {
        tracer: opentelemetry::global::BoxedTracer,
        render_hist: Histogram<f64>,
        dry_run_hist: Histogram<f64>,
        render_counter: Counter<u64>,
        dry_run_counter: Counter<u64>,
        resolver_counter: Counter<u64>,
    }

    impl Handles {
        fn new() -> Self {
            let meter = global::meter(METER_NAME);
            let render_hist = meter
                .f64_histogram("prompty.render.duration_ms")
                .with_description("Render duration in milliseconds")
                .init();
            let dry_run_hist = meter
                .f64_histogram("prompty.dry_run.duration_ms")
                .with_description("Dry-run duration in milliseconds")
                .init();
            let render_counter = meter
                .u64_counter("prompty.render.count")
                .with_description("Number of template renders")
                .init();
            let dry_run_counter = meter
                .u64_counter("prompty.dry_run.count")
                .with_description("Number of template dry runs")
                .init();
            let resolver_counter = meter
                .u64_counter("prompty.resolver.count")
                .with_description("Number of resolver invocations")
                .init();
            let tracer = global::tracer(TRACER_NAME);
            Self {
                tracer,
                render_hist,
                dry_run_hist,
                render_counter,
                dry_run_counter,
                resolver_counter,
            }
        }
    }

    fn handles() -> &'static Handles {
        HANDLES.get_or_init(Handles::new)
    }

    pub fn enable() {
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn disable() {
        ENABLED.store(false, Ordering::Relaxed);
    }

    fn enabled() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    fn record(
        operation: &'static str,
        template: &str,
        template_len: usize,
        duration: Duration,
        success: bool,
        counter: &Counter<u64>,
        hist: &Histogram<f64>,
    ) {
        let hs = handles();
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        let attrs = [
            KeyValue::new("template.name", template.to_string()),
            KeyValue::new("template.length", template_len as i64),
            KeyValue::new("success", success),
        ];
        counter.add(1, &attrs);
        hist.record(duration_ms, &attrs);
        let mut span = hs
            .tracer
            .span_builder(operation)
            .with_kind(SpanKind::Internal)
            .start(&hs.tracer);
        span.set_attribute(KeyValue::new("template.name", template.to_string()));
        span.set_attribute(KeyValue::new("template.length", template_len as i64));
        span.set_attribute(KeyValue::new("duration_ms", duration_ms));
        span.set_attribute(KeyValue::new("success", success));
        span.end();
    }

    pub fn record_render(template: &str, template_len: usize, duration: Duration, success: bool) {
        if !enabled() {
            return;
        }
        let hs = handles();
        record(
            "Engine::execute",
            template,
            template_len,
            duration,
            success,
            &hs.render_counter,
            &hs.render_hist,
        );
    }

    pub fn record_dry_run(template: &str, template_len: usize, duration: Duration, success: bool) {
        if !enabled() {
            return;
        }
        let hs = handles();
        record(
            "Engine::dry_run",
            template,
            template_len,
            duration,
            success,
            &hs.dry_run_counter,
            &hs.dry_run_hist,
        );
    }

    pub fn record_resolver_invocation(tag: &str, success: bool) {
        if !enabled() {
            return;
        }
        let attrs = [
            KeyValue::new("resolver.tag", tag.to_string()),
            KeyValue::new("resolver.success", success),
        ];
        handles().resolver_counter.add(1, &attrs);
    }
}

#[cfg(not(feature = "telemetry"))]
mod otel {
    use std::time::Duration;

    pub fn enable() {}
    pub fn disable() {}
    pub fn record_render(
        _template: &str,
        _template_len: usize,
        _duration: Duration,
        _success: bool,
    ) {
    }
    pub fn record_dry_run(
        _template: &str,
        _template_len: usize,
        _duration: Duration,
        _success: bool,
    ) {
    }

    pub fn record_resolver_invocation(_tag: &str, _success: bool) {}
}

pub use otel::{disable, enable, record_dry_run, record_render, record_resolver_invocation};
