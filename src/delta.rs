//! Binary delta between two partition images.
//!
//! A patch is a header followed by COPY/INSERT operations, gzip-compressed as
//! a whole. COPY operations address the concatenation of the source image and
//! an optional bonus resource that is already present on the device.
//!
//! Header layout (little-endian):
//!
//! ```text
//! magic "RCVDIFF1" | source_len u64 | bonus_len u64 | target_len u64
//! source_sha256 [32] | target_sha256 [32]
//! ```

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use thiserror::Error;

const MAGIC: &[u8; 8] = b"RCVDIFF1";
const HEADER_LEN: usize = 8 + 8 * 3 + 32 * 2;

/// Matches shorter than one block are emitted as literal bytes.
const BLOCK: usize = 16;

const OP_END: u8 = 0x00;
const OP_COPY: u8 = 0x01;
const OP_INSERT: u8 = 0x02;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("patch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid patch magic")]
    BadMagic,
    #[error("{what} length mismatch: patch expects {expected}, got {actual}")]
    LengthMismatch { what: &'static str, expected: u64, actual: u64 },
    #[error("{what} digest mismatch")]
    DigestMismatch { what: &'static str },
    #[error("copy of {len} bytes at offset {offset} is out of bounds")]
    CopyOutOfBounds { offset: u64, len: u64 },
    #[error("unknown patch operation 0x{0:02x}")]
    UnknownOp(u8),
    #[error("patch truncated: operation wants {wanted} bytes, {available} left")]
    Truncated { wanted: u64, available: u64 },
    #[error("patch output overruns the declared target length {target_len}")]
    TargetOverrun { target_len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op<'a> {
    Copy { offset: u64, len: u64 },
    Insert(&'a [u8]),
}

struct Header {
    source_len: u64,
    bonus_len: u64,
    target_len: u64,
    source_sha256: [u8; 32],
    target_sha256: [u8; 32],
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Computes a compressed patch that turns `source` into `target`.
///
/// `bonus`, when given, is appended to the source as extra copy material and
/// must be supplied again to [`apply`].
pub fn diff(source: &[u8], bonus: Option<&[u8]>, target: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let bonus = bonus.unwrap_or_default();
    let mut reference = Vec::with_capacity(source.len() + bonus.len());
    reference.extend_from_slice(source);
    reference.extend_from_slice(bonus);

    let header = Header {
        source_len: source.len() as u64,
        bonus_len: bonus.len() as u64,
        target_len: target.len() as u64,
        source_sha256: sha256(source),
        target_sha256: sha256(target),
    };

    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::best());
    write_header(&mut encoder, &header)?;
    for op in compute_ops(&reference, target) {
        match op {
            Op::Copy { offset, len } => {
                encoder.write_all(&[OP_COPY])?;
                encoder.write_all(&offset.to_le_bytes())?;
                encoder.write_all(&len.to_le_bytes())?;
            }
            Op::Insert(data) => {
                encoder.write_all(&[OP_INSERT])?;
                encoder.write_all(&(data.len() as u64).to_le_bytes())?;
                encoder.write_all(data)?;
            }
        }
    }
    encoder.write_all(&[OP_END])?;
    Ok(encoder.finish()?)
}

/// Reconstructs the target from `source`, the optional bonus and a patch made by [`diff`].
pub fn apply(source: &[u8], bonus: Option<&[u8]>, patch: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut raw = Vec::new();
    GzDecoder::new(patch).read_to_end(&mut raw)?;
    let mut cursor = Cursor::new(raw.as_slice());

    let header = read_header(&mut cursor)?;
    let bonus = bonus.unwrap_or_default();
    check_len("source", header.source_len, source.len())?;
    check_len("bonus", header.bonus_len, bonus.len())?;
    if sha256(source) != header.source_sha256 {
        return Err(DeltaError::DigestMismatch { what: "source" });
    }

    let mut reference = Vec::with_capacity(source.len() + bonus.len());
    reference.extend_from_slice(source);
    reference.extend_from_slice(bonus);

    // Every output byte comes from the reference or the patch body.
    let bound = (reference.len() as u64).saturating_add(raw.len() as u64);
    let mut out = Vec::with_capacity(header.target_len.min(bound) as usize);
    loop {
        match read_u8(&mut cursor)? {
            OP_END => break,
            OP_COPY => {
                let offset = read_u64(&mut cursor)?;
                let len = read_u64(&mut cursor)?;
                let end = offset.checked_add(len).filter(|&e| e <= reference.len() as u64);
                let Some(end) = end else {
                    return Err(DeltaError::CopyOutOfBounds { offset, len });
                };
                check_room(&out, len, header.target_len)?;
                out.extend_from_slice(&reference[offset as usize..end as usize]);
            }
            OP_INSERT => {
                let len = read_u64(&mut cursor)?;
                let available = raw.len() as u64 - cursor.position();
                if len > available {
                    return Err(DeltaError::Truncated { wanted: len, available });
                }
                check_room(&out, len, header.target_len)?;
                let start = cursor.position() as usize;
                out.extend_from_slice(&raw[start..start + len as usize]);
                cursor.set_position(cursor.position() + len);
            }
            other => return Err(DeltaError::UnknownOp(other)),
        }
    }

    check_len("target", header.target_len, out.len())?;
    if sha256(&out) != header.target_sha256 {
        return Err(DeltaError::DigestMismatch { what: "target" });
    }
    Ok(out)
}

/// Fails if appending `len` bytes would take `out` past `target_len`.
fn check_room(out: &[u8], len: u64, target_len: u64) -> Result<(), DeltaError> {
    match (out.len() as u64).checked_add(len) {
        Some(total) if total <= target_len => Ok(()),
        _ => Err(DeltaError::TargetOverrun { target_len }),
    }
}

fn check_len(what: &'static str, expected: u64, actual: usize) -> Result<(), DeltaError> {
    if expected != actual as u64 {
        return Err(DeltaError::LengthMismatch { what, expected, actual: actual as u64 });
    }
    Ok(())
}

/// Greedy block matcher.
///
/// Every block-aligned window of the reference is indexed; the target is
/// scanned byte by byte and each hit is extended forwards as far as it goes.
fn compute_ops<'a>(reference: &[u8], target: &'a [u8]) -> Vec<Op<'a>> {
    let mut index: HashMap<&[u8], usize> = HashMap::new();
    if reference.len() >= BLOCK {
        for start in (0..=reference.len() - BLOCK).step_by(BLOCK) {
            index.entry(&reference[start..start + BLOCK]).or_insert(start);
        }
    }

    let mut ops = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;
    while pos + BLOCK <= target.len() {
        let Some(&ref_start) = index.get(&target[pos..pos + BLOCK]) else {
            pos += 1;
            continue;
        };

        let mut len = BLOCK;
        while pos + len < target.len()
            && ref_start + len < reference.len()
            && target[pos + len] == reference[ref_start + len]
        {
            len += 1;
        }

        if literal_start < pos {
            ops.push(Op::Insert(&target[literal_start..pos]));
        }
        ops.push(Op::Copy { offset: ref_start as u64, len: len as u64 });
        pos += len;
        literal_start = pos;
    }
    if literal_start < target.len() {
        ops.push(Op::Insert(&target[literal_start..]));
    }
    ops
}

fn write_header<W: Write>(w: &mut W, header: &Header) -> std::io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&header.source_len.to_le_bytes())?;
    w.write_all(&header.bonus_len.to_le_bytes())?;
    w.write_all(&header.target_len.to_le_bytes())?;
    w.write_all(&header.source_sha256)?;
    w.write_all(&header.target_sha256)
}

fn read_header<R: Read>(r: &mut R) -> Result<Header, DeltaError> {
    let mut buf = [0u8; HEADER_LEN];
    r.read_exact(&mut buf)?;
    if &buf[..8] != MAGIC {
        return Err(DeltaError::BadMagic);
    }
    let u64_at = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[at..at + 8]);
        u64::from_le_bytes(bytes)
    };
    let mut source_sha256 = [0u8; 32];
    let mut target_sha256 = [0u8; 32];
    source_sha256.copy_from_slice(&buf[32..64]);
    target_sha256.copy_from_slice(&buf[64..96]);
    Ok(Header {
        source_len: u64_at(8),
        bonus_len: u64_at(16),
        target_len: u64_at(24),
        source_sha256,
        target_sha256,
    })
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, DeltaError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, DeltaError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}
