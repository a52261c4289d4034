//! Upload payloads, either read from disk or generated on the fly.

use std::io::{self, Read};
use std::path::PathBuf;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// The contents of a file on disk.
    File(PathBuf),
    /// Deterministic random contents of the given length.
    Random(RandomPayload),
}

impl PayloadSource {
    /// Creates a random source with a fresh seed.
    pub fn random(len: u64) -> Self {
        Self::Random(RandomPayload::new(len, rand::random()))
    }

    /// Loads the payload into memory.
    ///
    /// This happens before any timing starts, so disk and RNG throughput never show up in the
    /// measured transfer durations.
    pub async fn load(&self) -> io::Result<Bytes> {
        match self {
            Self::File(path) => tokio::fs::read(path).await.map(Bytes::from),
            Self::Random(payload) => {
                let mut buf = Vec::with_capacity(payload.len as usize);
                payload.clone().read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// The file name used in the multipart upload.
    pub fn file_name(&self) -> String {
        match self {
            Self::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "payload.bin".into()),
            Self::Random(_) => "random.dat".into(),
        }
    }
}

/// Randomized contents of an upload.
///
/// Clone this instance to reproduce the same contents.
#[derive(Debug, Clone)]
pub struct RandomPayload {
    /// The remaining length of the payload in bytes.
    pub len: u64,
    /// The RNG used to fill the payload with random bytes.
    rng: SmallRng,
}

impl RandomPayload {
    /// Creates a payload of `len` bytes derived from `seed`.
    pub fn new(len: u64, seed: u64) -> Self {
        Self {
            len,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl io::Read for RandomPayload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len_to_fill = (buf.len() as u64).min(self.len) as usize;

        let fill_buf = &mut buf[..len_to_fill];
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        Ok(len_to_fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn random_payload_has_declared_length() {
        let payload = PayloadSource::Random(RandomPayload::new(70_000, 42));
        let bytes = payload.load().await.unwrap();
        assert_eq!(bytes.len(), 70_000);

        // Same seed, same contents
        let again = payload.load().await.unwrap();
        assert_eq!(bytes, again);
    }

    #[tokio::test]
    async fn fresh_random_payloads_differ() {
        let a = PayloadSource::random(4096).load().await.unwrap();
        let b = PayloadSource::random(4096).load().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn reads_file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"oh hai!").unwrap();

        let payload = PayloadSource::File(path);
        assert_eq!(payload.file_name(), "small.bin");
        assert_eq!(payload.load().await.unwrap().as_ref(), b"oh hai!");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let payload = PayloadSource::File("/nonexistent/file.bin".into());
        assert!(payload.load().await.is_err());
    }
}
