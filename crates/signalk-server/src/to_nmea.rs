//! NMEA 0183 output.
//!
//! One task per encoder definition subscribes to the encoder's paths on the
//! [`EventBus`], feeds the values to a [`SentenceCombiner`] and fires the
//! combiner's debounce timer. Settled sentences are published on the
//! outbound channel, in emission order.

use futures::stream::{select_all, StreamExt};
use signalk_protocol::{EncoderDefinition, SentenceCombiner};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::bus::EventBus;

/// Capacity of the outbound sentence channel.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Create the outbound sentence channel ("nmea0183out").
pub fn outbound_channel() -> broadcast::Sender<String> {
    let (sender, _) = broadcast::channel(OUTBOUND_CAPACITY);
    sender
}

/// Start one task per encoder.
///
/// The path subscriptions are taken before this returns, so no value pushed
/// afterwards is missed.
pub fn spawn_encoders(
    bus: &EventBus,
    encoders: &[EncoderDefinition],
    outbound: &broadcast::Sender<String>,
) -> Vec<JoinHandle<()>> {
    encoders
        .iter()
        .map(|encoder| {
            info!("Starting {} output on {}", encoder.name, encoder.keys.join(", "));
            tokio::spawn(run_encoder(
                SentenceCombiner::new(*encoder),
                bus,
                outbound.clone(),
            ))
        })
        .collect()
}

/// Drive one combiner until every path stream has ended.
pub fn run_encoder(
    mut combiner: SentenceCombiner,
    bus: &EventBus,
    outbound: broadcast::Sender<String>,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    let encoder = *combiner.encoder();
    let mut values = select_all(encoder.keys.iter().copied().map(|key| {
        bus.stream_for(key)
            .into_stream()
            .map(move |value| (key, value))
    }));

    async move {
        loop {
            let deadline = combiner.deadline();
            let wake = deadline.map_or_else(Instant::now, Instant::from_std);

            tokio::select! {
                next = values.next() => {
                    let Some((path, value)) = next else {
                        // Let an open window run out so its sentence still goes out.
                        if let Some(deadline) = combiner.deadline() {
                            tokio::time::sleep_until(Instant::from_std(deadline)).await;
                            if let Some(sentence) = combiner.on_timer(Instant::now().into_std()) {
                                publish(encoder.name, &outbound, sentence);
                            }
                        }
                        break;
                    };
                    trace!("{}: {path} = {value}", encoder.name);
                    combiner.on_value(path, value, Instant::now().into_std());
                }
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    if let Some(sentence) = combiner.on_timer(Instant::now().into_std()) {
                        publish(encoder.name, &outbound, sentence);
                    }
                }
            }
        }
        debug!("{} output stopped", encoder.name);
    }
}

fn publish(name: &str, outbound: &broadcast::Sender<String>, sentence: String) {
    debug!("{name}: {sentence}");
    // Nobody listening is fine.
    let _ = outbound.send(sentence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use signalk_core::{Delta, PathValue, Update};
    use signalk_protocol::{decode_sentence, MWV, RMC};
    use std::time::Duration;
    use tokio::time::timeout;

    const ANGLE: &str = "environment.wind.angleApparent";
    const SPEED: &str = "environment.wind.speedApparent";

    fn push(bus: &EventBus, values: &[(&str, Value)]) {
        bus.push_delta(&Delta::for_self(Update::new(
            None,
            values
                .iter()
                .map(|(p, v)| PathValue::new(*p, v.clone()))
                .collect(),
        )));
    }

    async fn nothing_more(rx: &mut broadcast::Receiver<String>) -> bool {
        timeout(Duration::from_secs(1), rx.recv()).await.is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_mwv_after_debounce_window() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[MWV], &outbound);

        let start = Instant::now();
        push(&bus, &[(ANGLE, json!(123.44)), (SPEED, json!(5.7))]);

        let sentence = rx.recv().await.unwrap();
        assert_eq!(sentence, "$SKMWV,123.4,R,5.7,M,A*20");
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        assert!(decode_sentence(&sentence).is_ok());
        assert!(nothing_more(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_last_value() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[MWV], &outbound);

        let start = Instant::now();
        push(&bus, &[(ANGLE, json!(10.0)), (SPEED, json!(1.0))]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        push(&bus, &[(ANGLE, json!(11.0))]);

        let sentence = rx.recv().await.unwrap();
        assert!(sentence.starts_with("$SKMWV,11.0,R,1.0,M,A*"));
        assert_eq!(start.elapsed(), Duration::from_millis(30));
        assert!(nothing_more(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_values_not_repeated() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[MWV], &outbound);

        push(&bus, &[(ANGLE, json!(1.0)), (SPEED, json!(2.0))]);
        assert!(rx.recv().await.is_ok());

        push(&bus, &[(ANGLE, json!(1.0)), (SPEED, json!(2.0))]);
        assert!(nothing_more(&mut rx).await);

        // Change and change back inside one window settles on the last emitted sentence.
        push(&bus, &[(ANGLE, json!(3.0))]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        push(&bus, &[(ANGLE, json!(1.0))]);
        assert!(nothing_more(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_path_means_no_output() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[MWV, RMC], &outbound);

        push(&bus, &[(ANGLE, json!(45.0))]);
        push(&bus, &[("navigation.speedOverGround", json!(2.0))]);
        assert!(nothing_more(&mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rmc_from_bus() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[RMC], &outbound);

        push(
            &bus,
            &[
                ("navigation.datetime", json!("2024-06-01T12:34:56Z")),
                ("navigation.speedOverGround", json!(5.0)),
                ("navigation.courseOverGroundTrue", json!(1.5)),
            ],
        );

        let sentence = rx.recv().await.unwrap();
        let decoded = decode_sentence(&sentence).unwrap();
        assert_eq!(decoded.id, "SKRMC");
        assert_eq!(
            decoded.fields,
            vec!["123456.020", "A", "0000.00", "N", "0000.00", "E", "9.7", "1.5", "0000", "8.0"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_sentence_sent_when_bus_closes() {
        let bus = EventBus::new("vessels.self");
        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        let handles = spawn_encoders(&bus, &[MWV], &outbound);

        let start = Instant::now();
        push(&bus, &[(ANGLE, json!(12.0)), (SPEED, json!(4.0))]);
        drop(bus);

        let sentence = rx.recv().await.unwrap();
        assert!(sentence.starts_with("$SKMWV,12.0,R,4.0,M,A*"));
        assert_eq!(start.elapsed(), Duration::from_millis(20));
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_before_start_are_used() {
        let bus = EventBus::new("vessels.self");
        push(&bus, &[(ANGLE, json!(90.0)), (SPEED, json!(3.0))]);

        let outbound = outbound_channel();
        let mut rx = outbound.subscribe();
        spawn_encoders(&bus, &[MWV], &outbound);

        let sentence = rx.recv().await.unwrap();
        assert!(sentence.starts_with("$SKMWV,90.0,R,3.0,M,A*"));
    }
}
