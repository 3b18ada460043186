use crate::types::Digest;
use crate::{Error, Result};
use fastcdc::v2020::{FastCDC, StreamCDC};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// FastCDC 2020 parameters. Boundaries are content-defined, so an edit only
/// disturbs the chunks around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 512 * 1024,
            avg_size: 1024 * 1024,
            max_size: 8 * 1024 * 1024,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        use fastcdc::v2020::{
            AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN,
        };

        let in_range = (MINIMUM_MIN..=MINIMUM_MAX).contains(&self.min_size)
            && (AVERAGE_MIN..=AVERAGE_MAX).contains(&self.avg_size)
            && (MAXIMUM_MIN..=MAXIMUM_MAX).contains(&self.max_size);
        if !in_range || self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(Error::InvalidConfig(format!(
                "chunk sizes out of range: min={} avg={} max={}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn chunk_data(&self, data: &[u8]) -> Vec<Chunk> {
        let ChunkerConfig { min_size, avg_size, max_size } = self.config;
        FastCDC::new(data, min_size, avg_size, max_size)
            .map(|chunk| Chunk::new(data[chunk.offset..chunk.offset + chunk.length].to_vec()))
            .collect()
    }

    /// Splits a stream without buffering it whole. Chunks come back in byte
    /// order; an empty stream yields no chunks.
    pub fn chunk_reader<R: Read>(&self, reader: R) -> Result<Vec<Chunk>> {
        let ChunkerConfig { min_size, avg_size, max_size } = self.config;
        StreamCDC::new(reader, min_size, avg_size, max_size)
            .map(|result| {
                result.map(|chunk| Chunk::new(chunk.data)).map_err(|e| match e {
                    fastcdc::v2020::Error::IoError(e) => Error::Io(e),
                    other => Error::Io(std::io::Error::other(format!("{:?}", other))),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    id: Digest,
    data: Vec<u8>,
}

impl Chunk {
    fn new(data: Vec<u8>) -> Self {
        Self {
            id: Digest::from_data(&data),
            data,
        }
    }

    pub fn id(&self) -> Digest {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn small() -> Chunker {
        Chunker::new(ChunkerConfig {
            min_size: 256,
            avg_size: 1024,
            max_size: 4096,
        })
        .unwrap()
    }

    fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_chunking_reproduces_input() {
        let chunker = small();
        let data = random_bytes(7, 100_000);
        let chunks = chunker.chunk_reader(&data[..]).unwrap();

        assert!(chunks.len() > 1);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data().to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_chunk_sizes_are_bounded() {
        let chunker = small();
        let data = random_bytes(11, 200_000);
        let chunks = chunker.chunk_reader(&data[..]).unwrap();

        let (last, rest) = chunks.split_last().unwrap();
        for chunk in rest {
            assert!(chunk.len() >= 256 && chunk.len() <= 4096, "chunk of {} bytes", chunk.len());
        }
        assert!(!last.is_empty() && last.len() <= 4096);
    }

    #[test]
    fn test_zero_filled_input_hits_max_size() {
        let chunker = small();
        let chunks = chunker.chunk_data(&vec![0u8; 10_000]);
        let total: usize = chunks.iter().map(Chunk::len).sum();
        assert_eq!(total, 10_000);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = small();
        let data = random_bytes(3, 50_000);
        let a: Vec<Digest> = chunker.chunk_data(&data).iter().map(Chunk::id).collect();
        let b: Vec<Digest> = chunker.chunk_reader(&data[..]).unwrap().iter().map(Chunk::id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_local_edit_keeps_distant_chunks() {
        let chunker = small();
        let data = random_bytes(5, 120_000);
        let mut edited = data.clone();
        edited.splice(100..100, b"inserted bytes".iter().copied());

        let before: Vec<Digest> = chunker.chunk_data(&data).iter().map(Chunk::id).collect();
        let after: Vec<Digest> = chunker.chunk_data(&edited).iter().map(Chunk::id).collect();

        let shared = after.iter().filter(|id| before.contains(id)).count();
        assert!(shared >= before.len() - 3, "only {} of {} chunks survived", shared, before.len());
    }

    #[test]
    fn test_empty_input_has_no_chunks() {
        let chunks = small().chunk_reader(std::io::empty()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Chunker::new(ChunkerConfig {
            min_size: 8192,
            avg_size: 1024,
            max_size: 4096,
        });
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        assert!(ChunkerConfig::default().validate().is_ok());
    }
}
