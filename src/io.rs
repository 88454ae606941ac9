//! Input and output collaborators: where initial worlds come from and where
//! saved worlds go.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use image::ImageEncoder;
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use tracing::info;

use crate::grid::{ALIVE, DEAD, World};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("image is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    Size {
        want_w: usize,
        want_h: usize,
        got_w: usize,
        got_h: usize,
    },
}

pub trait InputSource {
    /// Load the world named `name`, which must be `w × h`.
    fn read_world(&mut self, name: &str, w: usize, h: usize) -> Result<World, StoreError>;
}

pub trait OutputSink {
    /// Save `world` under `name` (no extension).
    fn write_world(&mut self, name: &str, world: &World) -> Result<(), StoreError>;
}

/// Reads and writes binary PGM (P5) images.
/// Pixels equal to 255 are alive; anything else is dead.
pub struct PgmStore {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl PgmStore {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }
}

impl InputSource for PgmStore {
    fn read_world(&mut self, name: &str, w: usize, h: usize) -> Result<World, StoreError> {
        let path = self.input_dir.join(format!("{name}.pgm"));
        let img = image::open(&path)?.into_luma8();
        let (got_w, got_h) = (img.width() as usize, img.height() as usize);
        if (got_w, got_h) != (w, h) {
            return Err(StoreError::Size {
                want_w: w,
                want_h: h,
                got_w,
                got_h,
            });
        }
        let data = img
            .into_raw()
            .into_iter()
            .map(|v| if v == ALIVE { ALIVE } else { DEAD })
            .collect();
        info!(path = %path.display(), "world.loaded");
        Ok(World { data, w, h })
    }
}

impl OutputSink for PgmStore {
    fn write_world(&mut self, name: &str, world: &World) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{name}.pgm"));
        let file = BufWriter::new(File::create(&path)?);
        PnmEncoder::new(file)
            .with_subtype(PnmSubtype::Graymap(SampleEncoding::Binary))
            .write_image(&world.data, world.w as u32, world.h as u32, image::ExtendedColorType::L8)?;
        info!(path = %path.display(), "world.saved");
        Ok(())
    }
}

/// Keeps every saved world in memory, in save order.
#[derive(Default)]
pub struct MemorySink {
    pub saved: Vec<(String, World)>,
}

impl OutputSink for MemorySink {
    fn write_world(&mut self, name: &str, world: &World) -> Result<(), StoreError> {
        self.saved.push((name.to_string(), world.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgm_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PgmStore::new(dir.path(), dir.path());
        let world = World::random(17, 9, 0.4, 23);
        store.write_world("17x9", &world).unwrap();
        let back = store.read_world("17x9", 17, 9).unwrap();
        assert_eq!(back, world);
    }

    #[test]
    fn wrong_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PgmStore::new(dir.path(), dir.path());
        store.write_world("img", &World::new(8, 8)).unwrap();
        let err = store.read_world("img", 16, 16).unwrap_err();
        assert!(matches!(err, StoreError::Size { got_w: 8, got_h: 8, .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PgmStore::new(dir.path(), dir.path());
        assert!(store.read_world("nope", 4, 4).is_err());
    }
}
