//! NMEA 0183 sentence framing.
//!
//! A sentence is `$` + identifier + comma separated fields + `*` + checksum.
//! The checksum is the XOR of every byte between `$` and `*`, rendered as two
//! uppercase hex digits. Line terminators are left to the sink.

use thiserror::Error;

/// Errors that can occur when decoding a received sentence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SentenceError {
    /// The sentence does not start with `$`.
    #[error("Sentence must start with '$'")]
    MissingStart,

    /// There is no `*` checksum delimiter.
    #[error("Sentence has no checksum")]
    MissingChecksum,

    /// The checksum is not two hex digits.
    #[error("Invalid checksum field: {0}")]
    InvalidChecksum(String),

    /// The checksum does not match the body.
    #[error("Checksum mismatch: expected {expected:02X}, found {found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },
}

/// XOR of every byte of `body`.
///
/// `body` is the text strictly between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Frame an identifier and fields into a checksummed sentence.
///
/// ```
/// use signalk_protocol::encode_sentence;
///
/// let sentence = encode_sentence("SKMWV", &["123.4", "R", "5.7", "M", "A"]);
/// assert_eq!(sentence, "$SKMWV,123.4,R,5.7,M,A*20");
/// ```
pub fn encode_sentence<S: AsRef<str>>(id: &str, fields: &[S]) -> String {
    let mut body = String::from(id);
    for field in fields {
        body.push(',');
        body.push_str(field.as_ref());
    }
    let sum = checksum(&body);
    format!("${body}*{sum:02X}")
}

/// A sentence split into identifier and fields, with its checksum verified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSentence<'a> {
    pub id: &'a str,
    pub fields: Vec<&'a str>,
}

/// Verify and split a sentence. Trailing CR/LF is ignored.
pub fn decode_sentence(line: &str) -> Result<DecodedSentence<'_>, SentenceError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix('$').ok_or(SentenceError::MissingStart)?;
    let (body, sum) = rest.rsplit_once('*').ok_or(SentenceError::MissingChecksum)?;

    if sum.len() != 2 {
        return Err(SentenceError::InvalidChecksum(sum.to_string()));
    }
    let found =
        u8::from_str_radix(sum, 16).map_err(|_| SentenceError::InvalidChecksum(sum.to_string()))?;
    let expected = checksum(body);
    if found != expected {
        return Err(SentenceError::ChecksumMismatch { expected, found });
    }

    let mut parts = body.split(',');
    let id = parts.next().unwrap_or_default();
    Ok(DecodedSentence {
        id,
        fields: parts.collect(),
    })
}
