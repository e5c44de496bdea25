//! The payload codec (§4.6): 1 MiB framing, the cipher cascade, payload MAC, optional
//! per-128-byte-unit Reed-Solomon protection, and the 60 GiB rekey boundary.

pub mod padding;

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, warn};

use crate::config::{FRAME_SIZE, REKEY_BOUNDARY, RS_PAYLOAD_UNIT};
use crate::crypto::derive::SubkeyStream;
use crate::crypto::mac::PayloadMac;
use crate::crypto::stream::Cascade;
use crate::encoding::{Rs, Shape, fast_decode_payload_unit};
use crate::error::{AuthFailureReason, CoreError};

const RS_SHARE_LEN: usize = 136;

fn to_array<const N: usize>(bytes: Vec<u8>) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    arr
}

/// Draws the next rekey nonce/Serpent-IV pair from the subkey stream (§4.5).
fn draw_rekey(stream: &mut SubkeyStream, paranoid: bool) -> ([u8; 24], Option<[u8; 16]>) {
    let nonce = to_array(stream.next(24, "rekey ChaCha nonce"));
    let iv = if paranoid { Some(to_array(stream.next(16, "rekey Serpent IV"))) } else { None };
    (nonce, iv)
}

/// Encodes one frame's ciphertext into its on-disk Reed-Solomon representation,
/// PKCS#7-padding a trailing partial unit. Returns whether padding was applied.
fn rs_encode_frame(rs: &Rs, ciphertext: &[u8], out: &mut Vec<u8>) -> bool {
    let mut padded = false;
    let mut chunks = ciphertext.chunks_exact(RS_PAYLOAD_UNIT);
    for chunk in &mut chunks {
        out.extend(rs.encode(chunk));
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        padded = true;
        let unit = padding::pad_unit(remainder);
        out.extend(rs.encode(&unit));
    }
    padded
}

/// Decodes one frame's on-disk bytes back to ciphertext, given whether this is the final
/// frame of the stream (only the final frame's trailing unit may need unpadding) and
/// whether the header's `padded_last_unit` flag is set. `fast` skips RS math entirely per
/// unit (§4.4 "fast decode"), so an uncorrectable share can only be detected on a full
/// (non-fast) pass.
///
/// When a share is uncorrectable: `keep=true` continues with its best-effort fallback
/// bytes and marks the result degraded; `keep=false` aborts the pass immediately with
/// `AuthFailure(DamagedPayload)`, matching the per-block decrypt contract.
fn rs_decode_frame(rs: &Rs, encoded: &[u8], is_final_frame: bool, padded_flag: bool, fast: bool, keep: bool) -> Result<(Vec<u8>, bool), CoreError> {
    assert_eq!(encoded.len() % RS_SHARE_LEN, 0, "RS-encoded frame must be a whole number of shares");
    let share_count = encoded.len() / RS_SHARE_LEN;
    let mut out = Vec::with_capacity(share_count * RS_PAYLOAD_UNIT);
    let mut degraded = false;

    for (i, share) in encoded.chunks_exact(RS_SHARE_LEN).enumerate() {
        let is_last_share = is_final_frame && i + 1 == share_count;
        let unit: [u8; RS_PAYLOAD_UNIT] = if fast {
            fast_decode_payload_unit(share.try_into().expect("136-byte share"))
        } else {
            match rs.decode(share) {
                Ok(data) => to_array(data),
                Err(uncorrectable) => {
                    if !keep {
                        return Err(CoreError::auth_failure(AuthFailureReason::DamagedPayload));
                    }
                    degraded = true;
                    to_array(uncorrectable.fallback)
                }
            }
        };

        if is_last_share && padded_flag {
            match padding::unpad_unit(&unit) {
                Ok(data) => out.extend(data),
                Err(e) => {
                    if !keep {
                        return Err(e);
                    }
                    degraded = true;
                    out.extend_from_slice(&unit);
                }
            }
        } else {
            out.extend_from_slice(&unit);
        }
    }

    Ok((out, degraded))
}

/// Encrypts `input` into `output` frame by frame, returning the final 64-byte
/// authentication tag and whether the last unit was padded.
#[instrument(skip_all)]
pub fn encrypt_stream<R: Read, W: Write>(mut input: R, mut output: W, mut cascade: Cascade, mut mac: PayloadMac, stream: &mut SubkeyStream, reed_solomon: bool, paranoid: bool, cancelled: &AtomicBool) -> Result<([u8; 64], bool), CoreError> {
    let rs = reed_solomon.then(|| Rs::new(Shape::Payload));
    let mut buf = vec![0u8; FRAME_SIZE];
    let mut bytes_since_rekey: u64 = 0;
    let mut any_padded = false;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }

        let n = read_up_to(&mut input, &mut buf)?;
        if n == 0 {
            break;
        }

        let frame = &mut buf[..n];
        cascade.encrypt_in_place(frame);
        mac.update(frame);

        if let Some(rs) = &rs {
            let mut encoded = Vec::with_capacity((n.div_ceil(RS_PAYLOAD_UNIT)) * RS_SHARE_LEN);
            if rs_encode_frame(rs, frame, &mut encoded) {
                any_padded = true;
            }
            output.write_all(&encoded).map_err(map_io_write)?;
        } else {
            output.write_all(frame).map_err(map_io_write)?;
        }

        bytes_since_rekey += n as u64;
        if bytes_since_rekey >= REKEY_BOUNDARY {
            let (nonce, iv) = draw_rekey(stream, paranoid);
            cascade.rekey(nonce, iv);
            bytes_since_rekey = 0;
            debug!("rekeyed cipher cascade at 60 GiB boundary");
        }

        if n < FRAME_SIZE {
            break;
        }
    }

    Ok((mac.finalize(), any_padded))
}

/// Decrypts a payload stream once, in the given `fast_decode` mode. Used internally by
/// [`decrypt_stream_with_retry`], which handles the MAC-mismatch retry.
#[allow(clippy::too_many_arguments)]
fn decrypt_stream_once<R: Read, W: Write>(mut input: R, mut output: W, mut cascade: Cascade, mut mac: PayloadMac, stream: &mut SubkeyStream, reed_solomon: bool, paranoid: bool, padded_flag: bool, fast_decode: bool, keep: bool, cancelled: &AtomicBool) -> Result<([u8; 64], bool), CoreError> {
    let rs = reed_solomon.then(|| Rs::new(Shape::Payload));
    let on_disk_frame_len = if reed_solomon { (FRAME_SIZE / RS_PAYLOAD_UNIT) * RS_SHARE_LEN } else { FRAME_SIZE };
    let mut buf = vec![0u8; on_disk_frame_len];
    let mut bytes_since_rekey: u64 = 0;
    let mut kept = false;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled);
        }

        let n = read_up_to(&mut input, &mut buf)?;
        if n == 0 {
            break;
        }
        let is_final_frame = n < on_disk_frame_len;
        let frame = &buf[..n];

        let (mut plaintext_ciphertext, frame_degraded) = if let Some(rs) = &rs {
            rs_decode_frame(rs, frame, is_final_frame, padded_flag, fast_decode, keep)?
        } else {
            (frame.to_vec(), false)
        };
        kept |= frame_degraded;

        mac.update(&plaintext_ciphertext);
        cascade.decrypt_in_place(&mut plaintext_ciphertext);
        output.write_all(&plaintext_ciphertext).map_err(map_io_write)?;

        let consumed_plaintext_equivalent = if reed_solomon { (n / RS_SHARE_LEN) * RS_PAYLOAD_UNIT } else { n };
        bytes_since_rekey += consumed_plaintext_equivalent as u64;
        if bytes_since_rekey >= REKEY_BOUNDARY {
            let (nonce, iv) = draw_rekey(stream, paranoid);
            cascade.rekey(nonce, iv);
            bytes_since_rekey = 0;
        }

        if is_final_frame {
            break;
        }
    }

    Ok((mac.finalize(), kept))
}

/// Decrypts a payload stream, retrying with full Reed-Solomon correction (fast-decode
/// disabled) on a MAC mismatch, per §4.6/§7: "if reedSolomon AND the last pass used fast
/// decode, retry the entire decryption with fast-decode disabled before declaring
/// failure."
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub fn decrypt_stream_with_retry<R: Read + Seek, W: Write + Seek>(mut input: R, mut output: W, cascade_factory: impl Fn() -> Cascade, mac_key: &[u8], paranoid: bool, reed_solomon: bool, padded_flag: bool, expected_tag: &[u8; 64], keep: bool, stream: &mut SubkeyStream, cancelled: &AtomicBool) -> Result<bool, CoreError> {
    let input_start = input.stream_position().map_err(map_io_write)?;
    let output_start = output.stream_position().map_err(map_io_write)?;

    let first_fast = reed_solomon;
    let mac = PayloadMac::new(paranoid, mac_key);
    let (tag, mut kept) = decrypt_stream_once(&mut input, &mut output, cascade_factory(), mac, stream, reed_solomon, paranoid, padded_flag, first_fast, keep, cancelled)?;

    if crate::crypto::hash::ct_eq(&tag, expected_tag) {
        return Ok(kept);
    }

    if first_fast {
        warn!("payload MAC mismatch on fast-decode pass, retrying with full Reed-Solomon correction");
        input.seek(SeekFrom::Start(input_start)).map_err(map_io_write)?;
        output.seek(SeekFrom::Start(output_start)).map_err(map_io_write)?;
        let mac = PayloadMac::new(paranoid, mac_key);
        let (tag2, kept2) = decrypt_stream_once(&mut input, &mut output, cascade_factory(), mac, stream, reed_solomon, paranoid, padded_flag, false, keep, cancelled)?;
        kept = kept2;
        if crate::crypto::hash::ct_eq(&tag2, expected_tag) {
            return Ok(kept);
        }
    }

    if keep {
        Ok(true)
    } else {
        Err(CoreError::auth_failure(AuthFailureReason::DamagedPayload))
    }
}

/// Reads up to `buf.len()` bytes, returning the number actually read (0 at EOF), looping
/// over short reads so a frame isn't split by an incidental partial read.
fn read_up_to<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<usize, CoreError> {
    let mut total = 0;
    while total < buf.len() {
        let n = input.read(&mut buf[total..]).map_err(map_io_read)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn map_io_read(e: std::io::Error) -> CoreError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => CoreError::AccessDenied(crate::error::IoDirection::Read),
        _ => CoreError::Io(e),
    }
}

fn map_io_write(e: std::io::Error) -> CoreError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => CoreError::AccessDenied(crate::error::IoDirection::Write),
        std::io::ErrorKind::OutOfMemory => CoreError::InsufficientSpace,
        _ => CoreError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn cascade(paranoid: bool) -> Cascade {
        if paranoid {
            Cascade::new([1u8; 32], [2u8; 24], Some([3u8; 32]), Some([4u8; 16]))
        } else {
            Cascade::new([1u8; 32], [2u8; 24], None, None)
        }
    }

    fn stream() -> SubkeyStream {
        SubkeyStream::new(&[5u8; 32], &[6u8; 32])
    }

    #[test]
    fn round_trip_small_input_no_rs() {
        let plaintext = b"hello world".to_vec();
        let mac_key = [7u8; 32];
        let cancelled = AtomicBool::new(false);

        let mut ciphertext = Vec::new();
        let mut s = stream();
        let (tag, padded) = encrypt_stream(Cursor::new(&plaintext), &mut ciphertext, cascade(false), PayloadMac::new(false, &mac_key), &mut s, false, false, &cancelled).unwrap();
        assert!(!padded);

        let mut s2 = stream();
        let mut out = Cursor::new(Vec::new());
        let kept = decrypt_stream_with_retry(Cursor::new(ciphertext), &mut out, || cascade(false), &mac_key, false, false, padded, &tag, false, &mut s2, &cancelled).unwrap();
        assert!(!kept);
        assert_eq!(out.into_inner(), plaintext);
    }

    #[test]
    fn round_trip_with_reed_solomon_and_padding() {
        let plaintext = vec![0x42u8; crate::config::FRAME_SIZE + 1];
        let mac_key = [7u8; 32];
        let cancelled = AtomicBool::new(false);

        let mut ciphertext = Vec::new();
        let mut s = stream();
        let (tag, padded) = encrypt_stream(Cursor::new(&plaintext), &mut ciphertext, cascade(true), PayloadMac::new(true, &mac_key), &mut s, true, true, &cancelled).unwrap();
        assert!(padded);

        let mut s2 = stream();
        let mut out = Cursor::new(Vec::new());
        decrypt_stream_with_retry(Cursor::new(ciphertext), &mut out, || cascade(true), &mac_key, true, true, padded, &tag, false, &mut s2, &cancelled).unwrap();
        assert_eq!(out.into_inner(), plaintext);
    }

    #[test]
    fn reed_solomon_corruption_is_fixed_by_the_full_correction_retry() {
        let plaintext = vec![0x77u8; 4096];
        let mac_key = [7u8; 32];
        let cancelled = AtomicBool::new(false);

        let mut s = stream();
        let mut ciphertext = Vec::new();
        let (tag, padded) = encrypt_stream(Cursor::new(&plaintext), &mut ciphertext, cascade(false), PayloadMac::new(false, &mac_key), &mut s, true, false, &cancelled).unwrap();

        // Flip one byte inside a parity/data position of the first share; fast decode
        // (which just takes the first 128 bytes verbatim) will surface the corruption,
        // forcing a MAC mismatch and the full-correction retry.
        ciphertext[3] ^= 0xFF;

        let mut s2 = stream();
        let mut out = Cursor::new(Vec::new());
        let kept = decrypt_stream_with_retry(Cursor::new(ciphertext), &mut out, || cascade(false), &mac_key, false, true, padded, &tag, false, &mut s2, &cancelled).unwrap();
        assert!(!kept);
        assert_eq!(out.into_inner(), plaintext);
    }

    #[test]
    fn tampered_ciphertext_is_detected_without_rs() {
        let plaintext = vec![1u8; 4096];
        let mac_key = [7u8; 32];
        let cancelled = AtomicBool::new(false);

        let mut ciphertext = Vec::new();
        let mut s = stream();
        let (tag, padded) = encrypt_stream(Cursor::new(&plaintext), &mut ciphertext, cascade(false), PayloadMac::new(false, &mac_key), &mut s, false, false, &cancelled).unwrap();

        ciphertext[0] ^= 0xFF;

        let mut s2 = stream();
        let mut out = Cursor::new(Vec::new());
        let result = decrypt_stream_with_retry(Cursor::new(ciphertext), &mut out, || cascade(false), &mac_key, false, false, padded, &tag, false, &mut s2, &cancelled);
        assert!(result.is_err());
    }
}
