//! G.711 µ-law / A-law companding (ITU-T G.711, G.191 reference arithmetic)
//!
//! Decoding is a lookup into 256-entry tables built at compile time.

const fn ulaw_expand(compressed: u8) -> i16 {
    let mantissa = (!compressed) as i16;
    let exponent = (mantissa >> 4) & 0x07;
    let segment = exponent + 1;
    let mantissa = mantissa & 0x0F;
    let step = 4 << segment;
    let magnitude = (0x80 << exponent) + step * mantissa + step / 2 - 4 * 33;
    if compressed < 0x80 {
        -magnitude
    } else {
        magnitude
    }
}

const fn alaw_expand(compressed: u8) -> i16 {
    let ix = ((compressed ^ 0x55) & 0x7F) as i16;
    let exponent = ix >> 4;
    let mut mantissa = ix & 0x0F;
    if exponent > 0 {
        mantissa += 16;
    }
    mantissa = (mantissa << 4) + 0x08;
    if exponent > 1 {
        mantissa <<= exponent - 1;
    }
    if compressed > 127 {
        mantissa
    } else {
        -mantissa
    }
}

const fn build_ulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ulaw_expand(i as u8);
        i += 1;
    }
    table
}

const fn build_alaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = alaw_expand(i as u8);
        i += 1;
    }
    table
}

static ULAW_DECODE: [i16; 256] = build_ulaw_table();
static ALAW_DECODE: [i16; 256] = build_alaw_table();

/// Decode one µ-law byte
#[inline]
pub fn ulaw_to_linear(byte: u8) -> i16 {
    ULAW_DECODE[byte as usize]
}

/// Decode one A-law byte
#[inline]
pub fn alaw_to_linear(byte: u8) -> i16 {
    ALAW_DECODE[byte as usize]
}

/// Encode one linear sample as µ-law
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let absno = if sample < 0 {
        ((!sample) >> 2) + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high = 0x08 - segno;
    let low = 0x0F - ((absno >> segno) & 0x0F);
    let mut result = (high << 4) | low;
    if sample >= 0 {
        result |= 0x80;
    }
    result as u8
}

/// Encode one linear sample as A-law
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut ix = if sample < 0 { (!sample) >> 4 } else { sample >> 4 };
    if ix > 15 {
        let mut exponent = 1;
        while ix > 16 + 15 {
            ix >>= 1;
            exponent += 1;
        }
        ix -= 16;
        ix += exponent << 4;
    }
    if sample >= 0 {
        ix |= 0x80;
    }
    (ix ^ 0x55) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0x00), -32124);
        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0x55), -8);
        assert_eq!(alaw_to_linear(0xAA), 32256);
    }

    #[test]
    fn test_encode_decode_is_stable() {
        // decoding an encoded value and re-encoding must reproduce the code word
        for byte in 0..=255u8 {
            assert_eq!(linear_to_alaw(alaw_to_linear(byte)), byte);
        }
        for byte in 0..=255u8 {
            // 0x7F and 0xFF both decode to zero
            if byte == 0x7F {
                continue;
            }
            assert_eq!(linear_to_ulaw(ulaw_to_linear(byte)), byte);
        }
    }

    #[test]
    fn test_quantization_error_bounded() {
        for sample in (-32000i32..32000).step_by(97) {
            let s = sample as i16;
            let err_u = (ulaw_to_linear(linear_to_ulaw(s)) as i32 - sample).abs();
            let err_a = (alaw_to_linear(linear_to_alaw(s)) as i32 - sample).abs();
            assert!(err_u <= 1024, "ulaw error {} at {}", err_u, sample);
            assert!(err_a <= 1024, "alaw error {} at {}", err_a, sample);
        }
    }
}
