//! PKCS#7 padding for the final, possibly-partial 128-byte Reed-Solomon unit (§4.6).
//!
//! Only ever applied to a unit shorter than 128 bytes; full units are never padded, so
//! the pad length is always in `1..=128`.

use crate::config::RS_PAYLOAD_UNIT;
use crate::error::CoreError;

/// Pads `partial` (which must be shorter than 128 bytes) up to exactly 128 bytes.
///
/// # Panics
/// Panics if `partial.len() >= 128`.
#[must_use]
pub fn pad_unit(partial: &[u8]) -> [u8; RS_PAYLOAD_UNIT] {
    assert!(partial.len() < RS_PAYLOAD_UNIT, "pad_unit called on a full unit");
    let pad_len = RS_PAYLOAD_UNIT - partial.len();
    let mut out = [0u8; RS_PAYLOAD_UNIT];
    out[..partial.len()].copy_from_slice(partial);
    for b in &mut out[partial.len()..] {
        *b = pad_len as u8;
    }
    out
}

/// Removes PKCS#7 padding from a 128-byte unit, validating the pad length and that
/// every pad byte carries the same value.
pub fn unpad_unit(unit: &[u8; RS_PAYLOAD_UNIT]) -> Result<Vec<u8>, CoreError> {
    let pad_len = *unit.last().expect("unit is non-empty") as usize;
    if pad_len == 0 || pad_len > RS_PAYLOAD_UNIT {
        return Err(CoreError::auth_failure(crate::error::AuthFailureReason::DamagedPayload));
    }
    let data_len = RS_PAYLOAD_UNIT - pad_len;
    if !unit[data_len..].iter().all(|&b| usize::from(b) == pad_len) {
        return Err(CoreError::auth_failure(crate::error::AuthFailureReason::DamagedPayload));
    }
    Ok(unit[..data_len].to_vec())
}

/// Whether the final payload unit needs padding, computed once from the total plaintext
/// size (§4.6, §8 property 10). Every full frame is an exact multiple of the 128-byte
/// unit, so only the last (possibly partial) frame can ever end on a non-unit boundary,
/// and that frame's length mod 128 is just `total_plaintext_len mod 128`: set iff that's
/// nonzero.
#[must_use]
pub fn padded_flag_for_size(total_plaintext_len: u64) -> bool {
    let unit = RS_PAYLOAD_UNIT as u64;
    total_plaintext_len % unit != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_then_unpad_round_trips() {
        for len in 0..128usize {
            let data: Vec<u8> = (0..len as u8).collect();
            let padded = pad_unit(&data);
            assert_eq!(padded.len(), 128);
            let unpadded = unpad_unit(&padded).unwrap();
            assert_eq!(unpadded, data);
        }
    }

    #[test]
    fn unpad_rejects_zero_and_overlong_pad() {
        let mut unit = [5u8; 128];
        unit[127] = 0;
        assert!(unpad_unit(&unit).is_err());

        let mut unit2 = [1u8; 128];
        unit2[127] = 200;
        assert!(unpad_unit(&unit2).is_err());
    }

    #[test]
    fn unpad_rejects_inconsistent_pad_bytes() {
        let mut unit = pad_unit(&[1, 2, 3]);
        // pad_len here is 125; corrupt one of the pad bytes.
        let last_idx = unit.len() - 2;
        unit[last_idx] ^= 0xFF;
        assert!(unpad_unit(&unit).is_err());
    }

    #[test]
    fn padded_flag_matches_scenarios_2_and_3() {
        let one_mib = 1024 * 1024u64;
        assert!(!padded_flag_for_size(one_mib)); // scenario 2: exact 1 MiB, flag = 0
        assert!(padded_flag_for_size(one_mib + 1)); // scenario 3: 1 MiB + 1, flag = 1
        assert!(!padded_flag_for_size(0));
    }

    #[test]
    fn padded_flag_depends_only_on_unit_alignment_not_frame_proximity() {
        // A size far from any 1 MiB boundary but not a multiple of 128 still needs padding.
        assert!(padded_flag_for_size(200));
        assert!(padded_flag_for_size(1));
        assert!(!padded_flag_for_size(256));
    }
}
