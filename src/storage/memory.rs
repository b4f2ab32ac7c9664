use anyhow::Result;

use super::image_storage::ImageStorage;

/// Keeps the image in memory. Counts persists so callers can check when the image was written.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    image: Option<Vec<u8>>,
    persist_count: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes of the last persisted image.
    pub fn persisted(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn persist_count(&self) -> usize {
        self.persist_count
    }
}

impl ImageStorage for MemoryStorage {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.image.clone())
    }

    fn persist(&mut self, image: &[u8]) -> Result<()> {
        self.image = Some(image.to_vec());
        self.persist_count += 1;

        Ok(())
    }
}
