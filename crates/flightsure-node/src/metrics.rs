//! Prometheus counters for the oracle network

use crate::config::MetricsConfig;
use flightsure_core::error::FlightSureError;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters updated by the service on every accepted or rejected call
#[derive(Clone)]
pub struct ConsensusMetrics {
    registry: Registry,
    enabled: bool,
    requests_opened: IntCounter,
    reports_accepted: IntCounter,
    reports_rejected: IntCounterVec,
    finalizations: IntCounter,
    admissions: IntCounter,
    oracles_registered: IntGauge,
}

impl ConsensusMetrics {
    pub fn new(config: &MetricsConfig) -> anyhow::Result<Self> {
        let registry = Registry::new();
        let ns = config.namespace.as_str();

        let requests_opened = IntCounter::with_opts(
            Opts::new("requests_opened_total", "Status requests opened").namespace(ns),
        )?;
        let reports_accepted = IntCounter::with_opts(
            Opts::new("reports_accepted_total", "Oracle reports recorded").namespace(ns),
        )?;
        let reports_rejected = IntCounterVec::new(
            Opts::new("reports_rejected_total", "Oracle reports rejected").namespace(ns),
            &["reason"],
        )?;
        let finalizations = IntCounter::with_opts(
            Opts::new("finalizations_total", "Flight statuses finalized").namespace(ns),
        )?;
        let admissions = IntCounter::with_opts(
            Opts::new("airline_admissions_total", "Airlines admitted by vote").namespace(ns),
        )?;
        let oracles_registered = IntGauge::with_opts(
            Opts::new("oracles_registered", "Registered oracles").namespace(ns),
        )?;

        registry.register(Box::new(requests_opened.clone()))?;
        registry.register(Box::new(reports_accepted.clone()))?;
        registry.register(Box::new(reports_rejected.clone()))?;
        registry.register(Box::new(finalizations.clone()))?;
        registry.register(Box::new(admissions.clone()))?;
        registry.register(Box::new(oracles_registered.clone()))?;

        Ok(Self {
            registry,
            enabled: config.enabled,
            requests_opened,
            reports_accepted,
            reports_rejected,
            finalizations,
            admissions,
            oracles_registered,
        })
    }

    pub fn request_opened(&self) {
        if self.enabled {
            self.requests_opened.inc();
        }
    }

    pub fn report_accepted(&self, finalized: bool) {
        if self.enabled {
            self.reports_accepted.inc();
            if finalized {
                self.finalizations.inc();
            }
        }
    }

    pub fn report_rejected(&self, err: &FlightSureError) {
        if self.enabled {
            self.reports_rejected.with_label_values(&[rejection_reason(err)]).inc();
        }
    }

    pub fn airline_admitted(&self) {
        if self.enabled {
            self.admissions.inc();
        }
    }

    pub fn set_oracles(&self, count: usize) {
        if self.enabled {
            self.oracles_registered.set(count as i64);
        }
    }

    pub fn finalizations(&self) -> u64 {
        self.finalizations.get()
    }

    pub fn rejections(&self, reason: &str) -> u64 {
        self.reports_rejected.with_label_values(&[reason]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn rejection_reason(err: &FlightSureError) -> &'static str {
    match err {
        FlightSureError::IndexMismatch { .. } => "index_mismatch",
        FlightSureError::RequestClosedOrUnknown(_) => "closed_or_unknown",
        FlightSureError::DuplicateSubmission { .. } => "duplicate",
        FlightSureError::NotRegistered(_) => "unregistered",
        FlightSureError::OutOfRange { .. } => "out_of_range",
        FlightSureError::NotOperational => "not_operational",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightsure_core::types::Identity;

    #[test]
    fn test_counters_render() {
        let metrics = ConsensusMetrics::new(&MetricsConfig::default()).unwrap();
        metrics.request_opened();
        metrics.report_accepted(false);
        metrics.report_accepted(true);
        metrics.report_rejected(&FlightSureError::IndexMismatch {
            oracle: Identity::from_label("o"),
            index: 3,
        });
        metrics.set_oracles(25);

        assert_eq!(metrics.finalizations(), 1);
        assert_eq!(metrics.rejections("index_mismatch"), 1);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("flightsure_requests_opened_total 1"));
        assert!(text.contains("flightsure_reports_accepted_total 2"));
        assert!(text.contains("flightsure_oracles_registered 25"));
        assert!(text.contains("reason=\"index_mismatch\""));
    }

    #[test]
    fn test_disabled_metrics_stay_zero() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let metrics = ConsensusMetrics::new(&config).unwrap();
        metrics.report_accepted(true);
        assert_eq!(metrics.finalizations(), 0);
    }
}
