//! Streaming content digests for staged payloads.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{PlacementError, PlacementResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// Stream a file through SHA-256 without loading it into memory.
///
/// Returns the lowercase hex digest and the number of bytes hashed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> PlacementResult<(String, u64)> {
    let mut file =
        File::open(path).map_err(|source| PlacementError::io("digest.open", path, source))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|source| PlacementError::io("digest.read", path, source))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok((hex, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::Write;

    #[test]
    fn digest_matches_known_vector() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vector.txt");
        let mut file = File::create(&path)?;
        file.write_all(b"abc")?;

        let (hash, size) = hash_file(&path)?;
        assert_eq!(size, 3);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn identical_content_hashes_identically() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");
        std::fs::write(&first, vec![7_u8; 200_000])?;
        std::fs::write(&second, vec![7_u8; 200_000])?;

        assert_eq!(hash_file(&first)?.0, hash_file(&second)?.0);
        Ok(())
    }
}
