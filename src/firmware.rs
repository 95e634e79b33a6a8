use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::nxt;

/// A raw firmware image destined for the flash window.
#[derive(Debug)]
pub struct FirmwareImage {
    pub data: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("image is empty")]
    Empty,

    #[error("image of {len} bytes exceeds the {max}-byte flash window")]
    TooLarge { len: usize, max: usize },
}

impl FirmwareImage {
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() > nxt::FLASH_SIZE {
            return Err(ImageError::TooLarge {
                len: data.len(),
                max: nxt::FLASH_SIZE,
            });
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of flash pages the image occupies, the last one partial.
    pub fn page_count(&self) -> u32 {
        self.data.len().div_ceil(nxt::PAGE_SIZE) as u32
    }
}
