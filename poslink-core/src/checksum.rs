//! Frame checksum
//!
//! 1. Build buffer: [Kind, 0x00, 0x00, CorrelationID, Payload]
//! 2. Sum as unsigned 16-bit little-endian values
//! 3. When sum > 0xFFFF, subtract 0xFFFF (end-around carry)
//! 4. Take ones-complement: ~sum

use tracing::trace;

/// Calculate frame checksum
///
/// # Algorithm
///
/// ```text
/// 1. Words: [kind, 0, corr_lo16, corr_hi16, ...payload as LE u16]
/// 2. Sum all 16-bit words, folding carries back in
/// 3. Return ~sum as u16
/// ```
///
/// # Examples
///
/// ```
/// use poslink_core::checksum;
///
/// let checksum = checksum::calculate(1000, 7, &[]);
/// assert!(checksum::verify(1000, 7, &[], checksum));
/// ```
pub fn calculate(kind: u16, correlation_id: u32, payload: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    // Header words (checksum field counts as zero)
    let header = [
        kind,
        0,
        (correlation_id & 0xFFFF) as u16,
        (correlation_id >> 16) as u16,
    ];
    for word in header {
        sum = fold(sum + word as u32);
    }

    for chunk in payload.chunks(2) {
        let word = match chunk {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]) as u32,
            // Odd trailing byte is the low byte of a zero-padded word
            [lo] => *lo as u32,
            _ => 0,
        };
        sum = fold(sum + word);
    }

    let checksum = !(sum as u16);

    trace!(
        kind = kind,
        correlation_id = correlation_id,
        payload_len = payload.len(),
        checksum = format!("0x{:04X}", checksum),
        "Calculated checksum"
    );

    checksum
}

fn fold(mut sum: u32) -> u32 {
    while sum > 0xFFFF {
        sum -= 0xFFFF;
    }
    sum
}

/// Verify checksum
pub fn verify(kind: u16, correlation_id: u32, payload: &[u8], expected: u16) -> bool {
    calculate(kind, correlation_id, payload) == expected
}
