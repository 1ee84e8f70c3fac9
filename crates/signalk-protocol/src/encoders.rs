//! Signal K to NMEA 0183 sentence encoders.
//!
//! Each [`EncoderDefinition`] names the Signal K paths it needs and a format
//! function that receives the latest value of each path, in the same order,
//! and returns the finished sentence. A format function returns `None` when
//! an input is not usable, so a malformed sentence is never produced.

use chrono::DateTime;
use serde_json::Value;

use crate::sentence::encode_sentence;

/// Meters per second to knots.
pub const MS_TO_KNOTS: f64 = 1.94384;

/// A static sentence encoder.
#[derive(Debug, Clone, Copy)]
pub struct EncoderDefinition {
    /// Sentence type, used in logs.
    pub name: &'static str,
    /// Required Signal K paths, in the order the format function expects.
    pub keys: &'static [&'static str],
    format: fn(&[Value]) -> Option<String>,
}

impl EncoderDefinition {
    /// An encoder whose `format` receives the latest value of every key,
    /// in key order.
    pub const fn new(
        name: &'static str,
        keys: &'static [&'static str],
        format: fn(&[Value]) -> Option<String>,
    ) -> Self {
        Self { name, keys, format }
    }

    /// Run the format function, checking arity first.
    pub fn encode(&self, values: &[Value]) -> Option<String> {
        if values.len() != self.keys.len() {
            return None;
        }
        (self.format)(values)
    }
}

/// MWV - Wind Speed and Angle.
///
/// ```text
///         1   2 3   4 5
///         |   | |   | |
///  $--MWV,x.x,a,x.x,a*hh
/// ```
/// 1. Wind angle, 2. Reference (R = relative), 3. Wind speed,
/// 4. Speed units (M = meters/second), 5. Status (A = valid).
pub const MWV: EncoderDefinition = EncoderDefinition {
    name: "MWV",
    keys: &[
        "environment.wind.angleApparent",
        "environment.wind.speedApparent",
    ],
    format: mwv,
};

/// APB - Autopilot Sentence "B", from the great circle course.
///
/// ```text
///        1 2 3   4 5 6 7 8   9 10   11  12 13  14
///        | | |   | | | | |   | |    |   |  |   |
/// $--APB,A,A,x.x,a,N,A,A,x.x,a,c--c,x.x,a,x.x,a*hh
/// ```
/// 3. Cross track error magnitude, 4. Direction to steer (L/R),
/// 8. Bearing origin to destination, 11. Bearing present position to
/// destination, 13. Heading to steer. All bearings are reported as true.
pub const APB: EncoderDefinition = EncoderDefinition {
    name: "APB",
    keys: &[
        "navigation.courseGreatCircle.crossTrackError",
        "navigation.courseGreatCircle.bearingTrackTrue",
        "navigation.courseGreatCircle.nextPoint.bearingTrue",
    ],
    format: apb,
};

/// RMC - Recommended Minimum Navigation Information.
///
/// ```text
///         1         2 3       4 5        6 7   8   9    10
///         |         | |       | |        | |   |   |    |
///  $--RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,xxxx,x.x*hh
/// ```
/// Latitude and longitude are not among the inputs and are sent as zero
/// placeholders. Consumers that need a real position must add
/// `navigation.position` to the keys.
pub const RMC: EncoderDefinition = EncoderDefinition {
    name: "RMC",
    keys: &[
        "navigation.datetime",
        "navigation.speedOverGround",
        "navigation.courseOverGroundTrue",
    ],
    format: rmc,
};

static BUILTIN: [EncoderDefinition; 3] = [MWV, APB, RMC];

/// The encoders the gateway runs.
pub fn builtin_encoders() -> &'static [EncoderDefinition] {
    &BUILTIN
}

fn mwv(values: &[Value]) -> Option<String> {
    let [angle, speed] = values else {
        return None;
    };
    let angle = number(angle)?;
    let speed = number(speed)?;
    Some(encode_sentence(
        "SKMWV",
        &[
            fixed(angle, 1),
            "R".to_string(),
            fixed(speed, 1),
            "M".to_string(),
            "A".to_string(),
        ],
    ))
}

fn apb(values: &[Value]) -> Option<String> {
    let [xte, origin_to_dest, to_dest] = values else {
        return None;
    };
    let xte = number(xte)?;
    let origin_to_dest = number(origin_to_dest)?;
    let to_dest = number(to_dest)?;
    let steer = if xte > 0.0 { "R" } else { "L" };
    Some(encode_sentence(
        "SKAPB",
        &[
            "A".to_string(),
            "A".to_string(),
            xte.abs().to_string(),
            steer.to_string(),
            "M".to_string(),
            "V".to_string(),
            "V".to_string(),
            fixed(origin_to_dest, 0),
            "T".to_string(),
            "00".to_string(),
            fixed(to_dest, 0),
            "T".to_string(),
            fixed(to_dest, 0),
            "T".to_string(),
        ],
    ))
}

fn rmc(values: &[Value]) -> Option<String> {
    let [datetime, sog, cog] = values else {
        return None;
    };
    // Clock fields are taken in the timestamp's own offset.
    let datetime = DateTime::parse_from_rfc3339(datetime.as_str()?).ok()?;
    let sog = number(sog)?;
    let cog = number(cog)?;
    Some(encode_sentence(
        "SKRMC",
        &[
            format!("{}.020", datetime.format("%H%M%S")),
            "A".to_string(),
            "0000.00".to_string(),
            "N".to_string(),
            "0000.00".to_string(),
            "E".to_string(),
            fixed(sog * MS_TO_KNOTS, 1),
            fixed(cog, 1),
            "0000".to_string(),
            "8.0".to_string(),
        ],
    ))
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

/// Fixed-point rendering. An exact tie rounds away from zero; any other
/// value keeps its correctly rounded decimal form.
fn fixed(n: f64, digits: usize) -> String {
    let scale = 10f64.powi(digits as i32);
    let scaled = n * scale;
    // The fused residual is zero only when `scaled` is the exact product.
    if scaled.fract().abs() == 0.5 && n.mul_add(scale, -scaled) == 0.0 {
        return format!("{:.*}", digits, scaled.round() / scale);
    }
    format!("{:.*}", digits, n)
}
