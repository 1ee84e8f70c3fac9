//! Combine-latest, change filtering and trailing-edge debounce for one encoder.
//!
//! [`SentenceCombiner`] is a plain state machine driven by two transitions:
//! [`SentenceCombiner::on_value`] when a required path receives a value and
//! [`SentenceCombiner::on_timer`] when the debounce deadline passes. Time is
//! passed in by the caller, so the same machine runs under any runtime and
//! under a paused test clock.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::encoders::EncoderDefinition;

/// Quiet period after the last qualifying change before a sentence is sent.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub struct SentenceCombiner {
    encoder: EncoderDefinition,
    window: Duration,
    /// Latest value per key, in key order.
    latest: Vec<Option<Value>>,
    /// Most recent sentence the format function produced.
    last_computed: Option<String>,
    /// Sentence waiting for the window to close.
    pending: Option<String>,
    deadline: Option<Instant>,
    last_emitted: Option<String>,
}

impl SentenceCombiner {
    pub fn new(encoder: EncoderDefinition) -> Self {
        Self {
            encoder,
            window: DEBOUNCE_WINDOW,
            latest: vec![None; encoder.keys.len()],
            last_computed: None,
            pending: None,
            deadline: None,
            last_emitted: None,
        }
    }

    /// Override the debounce window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn encoder(&self) -> &EncoderDefinition {
        &self.encoder
    }

    /// The instant the pending sentence becomes due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a new value for `path` and recombine.
    ///
    /// Nothing is computed until every key has a value. A recomputation that
    /// differs from the previous one becomes the pending sentence and
    /// restarts the window. Returns the current deadline.
    pub fn on_value(&mut self, path: &str, value: Value, now: Instant) -> Option<Instant> {
        let mut matched = false;
        for (key, slot) in self.encoder.keys.iter().zip(self.latest.iter_mut()) {
            if *key == path {
                *slot = Some(value.clone());
                matched = true;
            }
        }
        if !matched {
            return self.deadline;
        }

        let Some(values) = self.latest.iter().cloned().collect::<Option<Vec<Value>>>() else {
            return self.deadline;
        };

        // Unusable inputs produce no sentence and leave the previous state alone.
        let Some(sentence) = self.encoder.encode(&values) else {
            return self.deadline;
        };
        if self.last_computed.as_deref() == Some(sentence.as_str()) {
            return self.deadline;
        }

        self.last_computed = Some(sentence.clone());
        self.pending = Some(sentence);
        self.deadline = Some(now + self.window);
        self.deadline
    }

    /// Fire the debounce timer.
    ///
    /// Returns the settled sentence if the deadline has passed and the
    /// sentence differs from the last one emitted.
    pub fn on_timer(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        self.deadline = None;

        let sentence = self.pending.take()?;
        if self.last_emitted.as_deref() == Some(sentence.as_str()) {
            return None;
        }
        self.last_emitted = Some(sentence.clone());
        Some(sentence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::MWV;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ANGLE: &str = "environment.wind.angleApparent";
    const SPEED: &str = "environment.wind.speedApparent";

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn body(sentence: &str) -> &str {
        &sentence[1..sentence.rfind('*').unwrap()]
    }

    #[test]
    fn test_no_output_until_all_keys_present() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);

        assert_eq!(combiner.on_value(ANGLE, json!(123.44), t0), None);
        assert_eq!(combiner.on_timer(t0 + ms(100)), None);

        let deadline = combiner.on_value(SPEED, json!(5.67), t0 + ms(100));
        assert_eq!(deadline, Some(t0 + ms(120)));

        let sentence = combiner.on_timer(t0 + ms(120)).unwrap();
        assert_eq!(body(&sentence), "SKMWV,123.4,R,5.7,M,A");
    }

    #[test]
    fn test_timer_before_deadline_does_nothing() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        combiner.on_value(ANGLE, json!(10.0), t0);
        combiner.on_value(SPEED, json!(2.0), t0);

        assert_eq!(combiner.on_timer(t0 + ms(19)), None);
        assert!(combiner.on_timer(t0 + ms(20)).is_some());
    }

    #[test]
    fn test_unknown_path_is_ignored() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        assert_eq!(combiner.on_value("navigation.speedOverGround", json!(1.0), t0), None);
    }

    #[test]
    fn test_duplicate_values_emit_once() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        combiner.on_value(ANGLE, json!(10.0), t0);
        combiner.on_value(SPEED, json!(2.0), t0);
        assert!(combiner.on_timer(t0 + ms(20)).is_some());

        // Same combination again: not a qualifying change.
        assert_eq!(combiner.on_value(SPEED, json!(2.0), t0 + ms(50)), None);
        assert_eq!(combiner.on_timer(t0 + ms(100)), None);
    }

    #[test]
    fn test_burst_coalesces_to_last_value() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        combiner.on_value(ANGLE, json!(10.0), t0);

        let mut deadline = None;
        for (i, speed) in [1.0, 2.0, 3.0, 4.0, 5.0].into_iter().enumerate() {
            let now = t0 + ms(i as u64 * 5);
            deadline = combiner.on_value(SPEED, json!(speed), now);
            // Each change restarts the window.
            assert_eq!(deadline, Some(now + DEBOUNCE_WINDOW));
            if i > 0 {
                assert_eq!(combiner.on_timer(now), None);
            }
        }

        let sentence = combiner.on_timer(deadline.unwrap()).unwrap();
        assert_eq!(body(&sentence), "SKMWV,10.0,R,5.0,M,A");
        assert_eq!(combiner.on_timer(deadline.unwrap() + ms(100)), None);
    }

    #[test]
    fn test_return_to_emitted_value_within_window_is_suppressed() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        combiner.on_value(ANGLE, json!(10.0), t0);
        combiner.on_value(SPEED, json!(2.0), t0);
        assert!(combiner.on_timer(t0 + ms(20)).is_some());

        combiner.on_value(SPEED, json!(3.0), t0 + ms(30));
        let deadline = combiner.on_value(SPEED, json!(2.0), t0 + ms(35)).unwrap();
        assert_eq!(combiner.on_timer(deadline), None);
    }

    #[test]
    fn test_unusable_input_keeps_previous_state() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV);
        combiner.on_value(ANGLE, json!(10.0), t0);
        combiner.on_value(SPEED, json!(2.0), t0);
        assert!(combiner.on_timer(t0 + ms(20)).is_some());

        assert_eq!(combiner.on_value(SPEED, json!("fast"), t0 + ms(30)), None);
        assert_eq!(combiner.on_timer(t0 + ms(60)), None);

        combiner.on_value(SPEED, json!(2.5), t0 + ms(70));
        let sentence = combiner.on_timer(t0 + ms(90)).unwrap();
        assert_eq!(body(&sentence), "SKMWV,10.0,R,2.5,M,A");
    }

    #[test]
    fn test_custom_window() {
        let t0 = Instant::now();
        let mut combiner = SentenceCombiner::new(MWV).with_window(ms(250));
        combiner.on_value(ANGLE, json!(10.0), t0);
        assert_eq!(combiner.on_value(SPEED, json!(2.0), t0), Some(t0 + ms(250)));
    }
}
