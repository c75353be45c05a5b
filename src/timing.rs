use std::time::Duration;

use crate::topology::LinkInfo;

/// microseconds per second times bits per byte
const BIT_MICROS_PER_BYTE_SECOND: u128 = 8_000_000;

/// Time it takes to put `frame_size_bytes` onto a link with the given bandwidth and for the last
///  bit to arrive at the other end.
pub fn transmission_time(frame_size_bytes: usize, link: &LinkInfo) -> Duration {
    // NB: zero bandwidth is rejected when the node starts; treat it as 'infinitely fast' here
    let bandwidth = link.bandwidth_bits_per_sec.max(1) as u128;
    let serialization_micros = frame_size_bytes as u128 * BIT_MICROS_PER_BYTE_SECOND / bandwidth;

    Duration::from_micros(serialization_micros.min(u64::MAX as u128) as u64)
        .saturating_add(link.propagation_delay)
}

/// Retransmission timeout for a locally originated data frame: transmission time including
///  propagation delay, multiplied by a safety factor to avoid premature retransmission under
///  regular jitter. This does not include the time it takes the ack to travel back: the factor
///  has to account for that.
pub fn estimate_timeout(frame_size_bytes: usize, link: &LinkInfo, safety_factor: u32) -> Duration {
    transmission_time(frame_size_bytes, link).saturating_mul(safety_factor)
}
