//! Telephony sample encodings and the energy measure used for voice detection.

use serde::{Deserialize, Serialize};

/// μ-law byte that decodes to a zero sample.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Zero level of unsigned 8-bit PCM.
pub const U8_ZERO_LEVEL: u8 = 128;

/// Single-byte sample encodings carried by the telephony transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// G.711 μ-law, the native media-stream encoding.
    #[default]
    Mulaw,
    /// Unsigned 8-bit linear PCM centred on 128.
    Unsigned8,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        1
    }

    /// Byte value that represents silence; used to pad partial frames.
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::Mulaw => MULAW_SILENCE,
            Self::Unsigned8 => U8_ZERO_LEVEL,
        }
    }

    /// Absolute deviation of one sample from the zero level, in 8-bit units.
    fn deviation(self, byte: u8) -> f64 {
        match self {
            Self::Mulaw => f64::from(mulaw_to_linear(byte).unsigned_abs()) / 256.0,
            Self::Unsigned8 => f64::from((i16::from(byte) - i16::from(U8_ZERO_LEVEL)).unsigned_abs()),
        }
    }
}

/// Decodes one G.711 μ-law byte to a 16-bit linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let inverted = !byte;
    let sign = inverted & 0x80;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = inverted & 0x0F;
    let magnitude = (((i32::from(mantissa) << 3) + 0x84) << exponent) - 0x84;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Mean absolute deviation of the samples in `bytes` from the encoding's zero
/// level, in 8-bit units (0-128). An empty buffer has zero energy.
pub fn mean_energy(bytes: &[u8], encoding: SampleEncoding) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let total: f64 = bytes.iter().map(|&b| encoding.deviation(b)).sum();
    total / bytes.len() as f64
}

/// Whether a chunk carries voice: its mean energy exceeds `threshold`.
pub fn is_voice(bytes: &[u8], encoding: SampleEncoding, threshold: f64) -> bool {
    mean_energy(bytes, encoding) > threshold
}
