//! G.711 A-law companding.
//!
//! This is the canonical segmented A-law: 16-bit PCM is folded to 13
//! bits, quantized into one of eight logarithmic segments, and the
//! result XORed with the alternating-bit mask the wire format requires.
//! Every value decodes back to the segment midpoint, so re-encoding a
//! decoded byte always reproduces it.

/// Upper edge of each A-law segment in the folded 13-bit domain.
const SEG_END: [i16; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

const SIGN_BIT: u8 = 0x80;

/// Encode one 16-bit sample as an A-law byte.
pub fn alaw_encode(pcm: i16) -> u8 {
    // Arithmetic shift folds to 13 bits and keeps the sign.
    let mut pcm = pcm >> 3;
    let mask = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    match SEG_END.iter().position(|&end| pcm <= end) {
        Some(seg) => {
            let quantized = if seg < 2 {
                (pcm >> 1) & 0xF
            } else {
                (pcm >> seg) & 0xF
            };
            (((seg as u8) << 4) | quantized as u8) ^ mask
        }
        // Out of range cannot happen for folded i16 input, but clamp to
        // the loudest code all the same.
        None => 0x7F ^ mask,
    }
}

/// Decode one A-law byte back to 16-bit PCM.
pub fn alaw_decode(code: u8) -> i16 {
    let a = code ^ 0x55;
    let mut t = i16::from(a & 0x0F) << 4;
    let seg = (a & 0x70) >> 4;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & SIGN_BIT != 0 {
        t
    } else {
        -t
    }
}

/// Encode a whole PCM frame into `out`, replacing its contents.
pub fn encode_frame(pcm: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.extend(pcm.iter().map(|&s| alaw_encode(s)));
}
