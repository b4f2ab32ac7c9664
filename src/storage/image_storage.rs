use anyhow::Result;

/// Somewhere to keep the serialized image between runs.
///
/// Storage always deals in whole images: there are no partial reads or writes.
pub trait ImageStorage {
    /// Reads the stored image, or returns `None` if nothing has been stored yet.
    fn load(&mut self) -> Result<Option<Vec<u8>>>;

    /// Replaces the stored image and makes it durable before returning.
    fn persist(&mut self, image: &[u8]) -> Result<()>;
}
