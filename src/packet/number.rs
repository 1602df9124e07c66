//! Packet number truncation and recovery (RFC 9000 section 17.1, A.2, A.3).

/// Number of bytes used to encode `full_pn`.
///
/// The encoding must cover twice the distance to the largest packet
/// number the peer has acknowledged (RFC 9000 section A.2). With nothing
/// acknowledged yet the distance is counted from zero.
pub fn pn_length(full_pn: u64, largest_acked: Option<u64>) -> usize {
    let num_unacked = match largest_acked {
        Some(largest) => full_pn.saturating_sub(largest).max(1),
        None => full_pn.saturating_add(1),
    };
    let min_bits = 64 - num_unacked.leading_zeros() + 1;
    (min_bits as usize).div_ceil(8).clamp(1, 4)
}

/// Truncated wire form of `full_pn` in `len` bytes, big-endian.
pub fn truncate_pn(full_pn: u64, len: usize) -> [u8; 4] {
    let bytes = (full_pn as u32).to_be_bytes();
    let mut out = [0u8; 4];
    out[..len].copy_from_slice(&bytes[4 - len..]);
    out
}

/// Recover a full packet number from its truncated form.
///
/// `expected_pn` is one more than the largest packet number received in
/// this space (zero when nothing has been received yet). The candidate
/// closest to it with the same low `8 * pn_len` bits wins.
pub fn decode_pn(truncated_pn: u64, pn_len: usize, expected_pn: u64) -> u64 {
    let pn_win = 1u64 << (pn_len * 8);
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let candidate_pn = (expected_pn & !pn_mask) | truncated_pn;

    if candidate_pn + pn_hwin <= expected_pn && candidate_pn < (1u64 << 62) - pn_win {
        candidate_pn + pn_win
    } else if candidate_pn > expected_pn + pn_hwin && candidate_pn >= pn_win {
        candidate_pn - pn_win
    } else {
        candidate_pn
    }
}
