//! A simplified stand-in for ArangoDB's VelocyPack binary array format.
//!
//! spec.md treats `use_vpack` as "binary body format" without specifying
//! the wire encoding, and explicitly classifies masking/transformation as
//! peripheral ("only its contract is specified", §1). Implementing the real
//! VelocyPack wire format is out of scope for the core dump pipeline this
//! spec is about; this module gives [`crate::interfaces::dump_data`] a real,
//! round-trippable binary array container to decode/re-encode around
//! masking, documented here as a simplification rather than silently
//! pretending to be wire-compatible with the genuine format.
//!
//! Layout: `[MAGIC: u8][count: u32 LE]` followed by `count` entries of
//! `[len: u32 LE][utf8 JSON bytes]`.

use thiserror::Error;

const MAGIC: u8 = 0xA7;

#[derive(Debug, Error)]
pub enum VPackError {
    #[error("truncated vpack array body")]
    Truncated,
    #[error("bad magic byte")]
    BadMagic,
    #[error("embedded JSON was invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes a sequence of documents as a simplified VPack-shaped array.
pub fn encode_array(values: &[serde_json::Value]) -> Result<Vec<u8>, VPackError> {
    let mut out = Vec::with_capacity(values.len() * 64 + 5);
    out.push(MAGIC);
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        let bytes = serde_json::to_vec(v)?;
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

/// Decodes a simplified VPack-shaped array back into documents.
pub fn decode_array(bytes: &[u8]) -> Result<Vec<serde_json::Value>, VPackError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    if bytes[0] != MAGIC {
        return Err(VPackError::BadMagic);
    }
    let mut pos = 1usize;
    let count = read_u32(bytes, &mut pos)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_u32(bytes, &mut pos)? as usize;
        let end = pos.checked_add(len).ok_or(VPackError::Truncated)?;
        let slice = bytes.get(pos..end).ok_or(VPackError::Truncated)?;
        out.push(serde_json::from_slice(slice)?);
        pos = end;
    }
    Ok(out)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, VPackError> {
    let end = pos.checked_add(4).ok_or(VPackError::Truncated)?;
    let slice = bytes.get(*pos..end).ok_or(VPackError::Truncated)?;
    *pos = end;
    Ok(u32::from_le_bytes(slice.try_into().expect("slice is 4 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrips_empty_array() {
        let encoded = encode_array(&[]).unwrap();
        assert_eq!(decode_array(&encoded).unwrap(), Vec::<serde_json::Value>::new());
    }

    #[test]
    fn roundtrips_documents() {
        let docs = vec![json!({"a": 1}), json!({"b": "x"}), json!(null)];
        let encoded = encode_array(&docs).unwrap();
        let decoded = decode_array(&encoded).unwrap();
        assert_eq!(docs, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode_array(&[0, 1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, VPackError::BadMagic));
    }
}
