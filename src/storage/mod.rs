/// File-backed image storage.
mod file;
/// The in-memory image and its on-disk layout.
mod image;
/// The image storage abstraction.
mod image_storage;
/// Memory-backed image storage.
mod memory;

pub use file::*;
pub use image::*;
pub use image_storage::*;
pub use memory::*;
