//! Time & ID services: a dependency-free rational type, trace ids, and the
//! random path generator used to obscure session URLs (spec §3 "Path
//! identity", §6 "Random path").

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// A timestamp or duration expressed as an exact fraction, independent of
/// any codec/muxer crate's own rational type. Conversions into the muxer's
/// native rational happen only at the muxer boundary (`crate::muxer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// `self - other`, rescaled onto a common denominator. Used for PTS
    /// deltas where both sides share a timebase (the common case for a
    /// single media kind's samples).
    pub fn checked_sub(self, other: Rational) -> Option<Rational> {
        if self.den == other.den {
            Some(Rational::new(self.num - other.num, self.den))
        } else {
            let num = self
                .num
                .checked_mul(other.den)?
                .checked_sub(other.num.checked_mul(self.den)?)?;
            let den = self.den.checked_mul(other.den)?;
            Some(Rational::new(num, den))
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.as_f64().partial_cmp(&other.as_f64())?)
    }
}

/// Generate a short opaque trace id for a segment, cheap enough to attach to
/// every emission (spec §3 Segment "opaque short trace id").
pub fn trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Generate an ASCII random path segment of lowercase letters, length `len`
/// (spec §3 "Path identity", default length 10).
pub fn random_path(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Monotonic-ish wall clock seconds since the epoch, used for the path
/// regeneration sequence-counter reseed (spec §4.6, step iv).
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_path_is_lowercase_ascii_of_requested_length() {
        let p = random_path(10);
        assert_eq!(p.len(), 10);
        assert!(p.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn random_path_varies() {
        let a = random_path(10);
        let b = random_path(10);
        // Not a hard guarantee, but collisions here would indicate a broken RNG.
        assert_ne!(a, b);
    }

    #[test]
    fn rational_as_f64() {
        let r = Rational::new(3, 2);
        assert_eq!(r.as_f64(), 1.5);
    }

    #[test]
    fn rational_sub_common_denominator() {
        let a = Rational::new(90000, 30);
        let b = Rational::new(0, 30);
        let d = a.checked_sub(b).unwrap();
        assert_eq!(d.as_f64(), 3000.0);
    }

    #[test]
    fn trace_id_is_short_and_hex() {
        let id = trace_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
