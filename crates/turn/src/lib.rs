//! Remote end-of-turn / prediction predictor client.
//!
//! The `eot` and `prediction` policy variants (`duet-policy`) query a
//! remote turn-relevance-probability service over HTTP. Two endpoints are
//! distinguished only by URL: a cheaper `trp` endpoint for `eot`, and a
//! richer `prediction` endpoint for `prediction`. Failure or timeout
//! degrades to `trp = 0` (keep listening) rather than propagating an
//! error, per the core's error-handling design.

use std::time::Duration;

/// One outcome of a predictor query, ready to be appended to
/// `UserState.all_trps`.
#[derive(Debug, Clone, Copy)]
pub struct TrpOutcome {
    pub trp: f32,
    pub prediction_time_ms: i64,
    /// False if the query failed/timed out and `trp` was synthesized as 0.
    pub succeeded: bool,
}

/// Capability consumed by the `eot`/`prediction` policy variants. Passed
/// in rather than referenced globally so tests can substitute a fake.
pub trait Predictor: Send + Sync {
    /// Query the predictor with the current condensed dialog plus the
    /// current (final or preliminary) utterance. Never errors: failures
    /// are folded into `TrpOutcome { succeeded: false, trp: 0.0, .. }`.
    fn query(&self, context: &[String]) -> TrpOutcome;
}

#[derive(Debug, serde::Serialize)]
struct TrpRequest<'a> {
    text: &'a [String],
}

#[derive(Debug, serde::Deserialize)]
struct TrpResponse {
    trp: Vec<f32>,
    #[serde(default)]
    #[allow(dead_code)]
    predictions: Option<serde_json::Value>,
    #[serde(default)]
    time: f32,
}

/// Blocking HTTP client hitting one of the two remote predictor endpoints.
pub struct HttpPredictor {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpPredictor {
    /// Build a client targeting the cheap `trp` endpoint used by `eot`.
    pub fn eot(base_url: &str, timeout: Duration) -> Self {
        Self::new(format!("{}/trp", base_url.trim_end_matches('/')), timeout)
    }

    /// Build a client targeting the richer `prediction` endpoint used by
    /// `prediction`.
    pub fn prediction(base_url: &str, timeout: Duration) -> Self {
        Self::new(
            format!("{}/prediction", base_url.trim_end_matches('/')),
            timeout,
        )
    }

    fn new(url: String, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("predictor http client");
        Self { client, url }
    }
}

impl Predictor for HttpPredictor {
    fn query(&self, context: &[String]) -> TrpOutcome {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let body = TrpRequest { text: context };
        match self.client.post(&self.url).json(&body).send() {
            Ok(response) => match response.json::<TrpResponse>() {
                Ok(parsed) => TrpOutcome {
                    trp: parsed.trp.last().copied().unwrap_or(0.0),
                    prediction_time_ms: (parsed.time * 1000.0) as i64,
                    succeeded: true,
                },
                Err(err) => {
                    tracing::warn!(error = %err, url = %self.url, "predictor returned unparseable response");
                    TrpOutcome {
                        trp: 0.0,
                        prediction_time_ms: now_ms,
                        succeeded: false,
                    }
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, url = %self.url, "predictor request failed or timed out");
                TrpOutcome {
                    trp: 0.0,
                    prediction_time_ms: now_ms,
                    succeeded: false,
                }
            }
        }
    }
}

/// In-process fake for tests: always returns a fixed TRP value.
pub struct FixedPredictor {
    pub trp: f32,
}

impl FixedPredictor {
    pub fn new(trp: f32) -> Self {
        Self { trp }
    }
}

impl Predictor for FixedPredictor {
    fn query(&self, _context: &[String]) -> TrpOutcome {
        TrpOutcome {
            trp: self.trp,
            prediction_time_ms: 0,
            succeeded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_predictor_returns_configured_value() {
        let predictor = FixedPredictor::new(0.85);
        let outcome = predictor.query(&["hello".to_string()]);
        assert_eq!(outcome.trp, 0.85);
        assert!(outcome.succeeded);
    }

    #[test]
    fn eot_and_prediction_urls_differ() {
        let eot = HttpPredictor::eot("http://localhost:5001", Duration::from_millis(150));
        let prediction = HttpPredictor::prediction("http://localhost:5001", Duration::from_millis(150));
        assert_eq!(eot.url, "http://localhost:5001/trp");
        assert_eq!(prediction.url, "http://localhost:5001/prediction");
    }
}
