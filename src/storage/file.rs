use std::ffi::OsString;
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::prelude::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use log::info;

use super::image::IMAGE_SIZE;
use super::image_storage::ImageStorage;

/// The extension appended to an image's base name to get its backing file.
pub const IMAGE_EXTENSION: &str = ".mfsi";

pub struct FileBackedStorage {
    file: File,
    path: PathBuf,
    /// Set when this handle created the file, meaning there is no image to load yet.
    created: bool,
}

impl FileBackedStorage {
    /// Opens the backing file for the image called `base`, creating it if it doesn't exist.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        let path = Self::image_path(base);

        match File::options().read(true).write(true).open(&path) {
            Ok(file) => {
                info!("opening existing image {}", path.display());
                Ok(Self {
                    file,
                    path,
                    created: false,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("creating new image {}", path.display());
                let file = File::options()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .with_context(|| format!("creating image file {}", path.display()))?;

                Ok(Self {
                    file,
                    path,
                    created: true,
                })
            }
            Err(err) => {
                Err(err).with_context(|| format!("opening image file {}", path.display()))
            }
        }
    }

    /// Opens the backing file for the image called `base` read-only. Fails if it doesn't exist.
    pub fn open_existing(base: impl AsRef<Path>) -> Result<Self> {
        let path = Self::image_path(base);
        let file = File::options()
            .read(true)
            .open(&path)
            .with_context(|| format!("opening image file {}", path.display()))?;

        Ok(Self {
            file,
            path,
            created: false,
        })
    }

    /// `base` with [`IMAGE_EXTENSION`] appended.
    pub fn image_path(base: impl AsRef<Path>) -> PathBuf {
        let mut name = OsString::from(base.as_ref().as_os_str());
        name.push(IMAGE_EXTENSION);

        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageStorage for FileBackedStorage {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        if self.created {
            return Ok(None);
        }

        let len = self.file.metadata().context("reading image metadata")?.len();
        ensure!(
            len == IMAGE_SIZE as u64,
            "image file {} is {len} bytes, expected {IMAGE_SIZE}",
            self.path.display()
        );

        let mut buf = vec![0; IMAGE_SIZE];
        self.file
            .read_exact_at(&mut buf, 0)
            .context("reading image")?;

        Ok(Some(buf))
    }

    fn persist(&mut self, image: &[u8]) -> Result<()> {
        ensure!(
            image.len() == IMAGE_SIZE,
            "refusing to persist an image of {} bytes",
            image.len()
        );

        self.file.write_all_at(image, 0).context("writing image")?;
        self.file.sync_all().context("flushing image to disk")?;

        // from here on the file holds an image
        self.created = false;

        Ok(())
    }
}
