//! Content digest used to identify "same content" across peers. Hashes
//! only the head, tail, and length of a file rather than its whole
//! content, so shares can be re-hashed without reading every byte on
//! every refresh.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Fs2Error;

/// Digest width in bits. blake3's native output is 256 bits and is used
/// unsplit, rather than truncated to some narrower width.
pub const FILE_DIGEST_BITS: usize = 256;
pub const FILE_DIGEST_BYTES: usize = FILE_DIGEST_BITS / 8;

/// Number of bytes taken from the head and from the tail of a file when
/// computing its digest. Files shorter than `2 * PREFIX_SUFFIX_LEN` hash
/// their entire content instead (see [`digest_reader`]).
pub const PREFIX_SUFFIX_LEN: u64 = 65_536;

/// Fixed-width content digest. The empty digest (all-zero bytes) denotes
/// "this entry is a directory"; it is never a valid file digest because
/// blake3 never outputs all zeroes for any finite input in practice, and
/// [`Digest::is_empty`] special-cases it regardless.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Digest(pub [u8; FILE_DIGEST_BYTES]);

impl Digest {
    pub const EMPTY: Digest = Digest([0u8; FILE_DIGEST_BYTES]);

    pub fn is_empty(&self) -> bool {
        *self == Digest::EMPTY
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Fs2Error> {
        if bytes.len() != FILE_DIGEST_BYTES {
            return Err(Fs2Error::BadHashLength {
                expected: FILE_DIGEST_BYTES,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; FILE_DIGEST_BYTES];
        out.copy_from_slice(bytes);
        Ok(Digest(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, Fs2Error> {
        let bytes = hex::decode(s).map_err(|_| Fs2Error::BadHashLength {
            expected: FILE_DIGEST_BYTES * 2,
            actual: s.len(),
        })?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the FS2 content digest for a file of the given length, reading
/// only the head and tail through `reader`.
///
/// digest = blake3(head[0..C) ‖ tail[L-C..L) ‖ decimal_ascii(L))
///
/// where `C = PREFIX_SUFFIX_LEN`. If `L < 2*C`, the whole file replaces
/// the head+tail segment (read once, not twice).
pub fn digest_reader<R: Read + Seek>(reader: &mut R, length: u64) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    let c = PREFIX_SUFFIX_LEN;

    if length < 2 * c {
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; length as usize];
        reader.read_exact(&mut buf)?;
        hasher.update(&buf);
    } else {
        let mut head = vec![0u8; c as usize];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut head)?;
        hasher.update(&head);

        let mut tail = vec![0u8; c as usize];
        reader.seek(SeekFrom::Start(length - c))?;
        reader.read_exact(&mut tail)?;
        hasher.update(&tail);
    }

    hasher.update(length.to_string().as_bytes());
    Ok(Digest(*hasher.finalize().as_bytes()))
}

/// Convenience wrapper computing the digest for a file on disk.
pub fn digest_file(path: &std::path::Path, length: u64) -> io::Result<Digest> {
    let mut f = std::fs::File::open(path)?;
    digest_reader(&mut f, length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_file_hashes_whole_content() {
        let data = b"hello world".to_vec();
        let mut cur = Cursor::new(data.clone());
        let d1 = digest_reader(&mut cur, data.len() as u64).unwrap();

        let mut cur2 = Cursor::new(data);
        let d2 = digest_reader(&mut cur2, 11).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn digest_is_deterministic_and_ignores_nothing_but_content() {
        let data = vec![7u8; (PREFIX_SUFFIX_LEN * 3) as usize];
        let len = data.len() as u64;
        let mut c1 = Cursor::new(data.clone());
        let mut c2 = Cursor::new(data);
        assert_eq!(digest_reader(&mut c1, len).unwrap(), digest_reader(&mut c2, len).unwrap());
    }

    #[test]
    fn different_lengths_give_different_digests() {
        let data = vec![0u8; (PREFIX_SUFFIX_LEN * 3) as usize];
        let mut c1 = Cursor::new(data.clone());
        let d1 = digest_reader(&mut c1, data.len() as u64).unwrap();

        // Same bytes, but claim a different length (can't actually happen via
        // digest_file, but exercises the length-mixing property directly).
        let mut c2 = Cursor::new(data);
        let d2 = digest_reader(&mut c2, (PREFIX_SUFFIX_LEN * 3 - 1) as u64).unwrap();
        assert_ne!(d1, d2);
    }

    #[test]
    fn empty_digest_marks_directories() {
        assert!(Digest::EMPTY.is_empty());
        assert_eq!(Digest::EMPTY.to_hex().len(), FILE_DIGEST_BYTES * 2);
    }

    #[test]
    fn round_trips_hex() {
        let d = Digest([42u8; FILE_DIGEST_BYTES]);
        let hex = d.to_hex();
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Digest::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Fs2Error::BadHashLength { .. }));
    }
}
