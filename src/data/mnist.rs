//! MNIST access: download, IDX parsing, train/validation/test splits and batching.
//!
//! Labels are read (the IDX files pair them with the images) but never batched, since both
//! models are unsupervised.

use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn_dataset::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::Read;
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const PIXELS: usize = WIDTH * HEIGHT;

/// Number of images held out of the training file for validation.
pub const VALID_SIZE: usize = 5_000;

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [WIDTH * HEIGHT]
    pub image: Vec<f32>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    /// Convert a raw MNIST item (image bytes) to a MNIST item (flat array image).
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), PIXELS);

        let image: Vec<f32> = item
            .image_bytes
            .iter()
            .map(|brightness| -> f32 { (*brightness).as_() })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// The training file minus its last [`VALID_SIZE`] images.
    Train,
    /// The last [`VALID_SIZE`] images of the training file.
    Valid,
    Test,
}

impl Split {
    fn files(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Split::Train | Split::Valid => ("train", TRAIN_IMAGES, TRAIN_LABELS),
            Split::Test => ("test", TEST_IMAGES, TEST_LABELS),
        }
    }
}

/// The MNIST dataset consists of 70,000 28x28 black-and-white images of handwritten digits.
/// There are 60,000 training images (split here into train and validation) and 10,000 test
/// images.
///
/// The data is downloaded from the web from the [CVDF mirror](https://github.com/cvdfoundation/mnist).
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    pub fn train() -> Result<Self> {
        Self::new(Split::Train)
    }

    pub fn valid() -> Result<Self> {
        Self::new(Split::Valid)
    }

    pub fn test() -> Result<Self> {
        Self::new(Split::Test)
    }

    pub fn new(split: Split) -> Result<Self> {
        let root = Self::cache_dir()?;
        Self::from_dir(&root, split)
    }

    /// Loads a split from a directory holding the files of both `train/` and `test/`,
    /// downloading whatever is missing.
    pub fn from_dir(root: &Path, split: Split) -> Result<Self> {
        let (dir_name, images_name, labels_name) = split.files();
        let split_dir = root.join(dir_name);
        create_dir_all(&split_dir)?;

        // MNIST is tiny so we can load it in-memory
        // Train images (u8): 28 * 28 * 60000 = 47.04Mb
        // Test images (u8): 28 * 28 * 10000 = 7.84Mb
        let images = read_images(&Self::download_file(images_name, &split_dir)?)?;
        let labels = read_labels(&Self::download_file(labels_name, &split_dir)?)?;
        if images.len() != labels.len() {
            return Err(Error::InvalidIdx {
                path: split_dir,
                reason: format!("{} images but {} labels", images.len(), labels.len()),
            });
        }

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();
        let n_train = items.len().saturating_sub(VALID_SIZE);
        let items = match split {
            Split::Train => items.into_iter().take(n_train).collect(),
            Split::Valid => items.into_iter().skip(n_train).collect(),
            Split::Test => items,
        };

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);
        Ok(Self { dataset })
    }

    /// Dataset files are stored in the burn-dataset cache directory.
    fn cache_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory")
        })?;
        Ok(home.join(".cache").join("burn-dataset").join("mnist"))
    }

    /// Download a file from the MNIST dataset URL to the destination directory, unless it is
    /// already there.
    fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = dest_dir.join(name);

        if !file_name.exists() {
            tracing::info!("downloading {name} into {dest_dir:?}");
            let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);
            decompress_into(&bytes, &file_name)?;
        }

        Ok(file_name)
    }
}

/// Gunzips `bytes` into `file_name`.
///
/// The data goes to a `.part` sibling first and is renamed once complete, so an interrupted
/// decompression never leaves a truncated file under the final name.
fn decompress_into(bytes: &[u8], file_name: &Path) -> Result<()> {
    let mut part_name = file_name.as_os_str().to_owned();
    part_name.push(".part");
    let part_name = PathBuf::from(part_name);

    let written = File::create(&part_name).and_then(|mut output_file| {
        let mut gz_buffer = GzDecoder::new(bytes);
        std::io::copy(&mut gz_buffer, &mut output_file)?;
        output_file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&part_name);
        return Err(e.into());
    }

    std::fs::rename(&part_name, file_name)?;
    Ok(())
}

fn read_u32(f: &mut File) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn invalid(path: &Path, reason: String) -> Error {
    Error::InvalidIdx {
        path: path.to_path_buf(),
        reason,
    }
}

/// Rejects headers announcing more items than the file holds, before anything is allocated.
fn check_len(f: &File, path: &Path, expected: u64, size: usize) -> Result<()> {
    let len = f.metadata()?.len();
    if len < expected {
        return Err(invalid(
            path,
            format!("header announces {size} items ({expected} bytes) but the file has {len} bytes"),
        ));
    }
    Ok(())
}

/// Reads an IDX3 image file, one `Vec` of `WIDTH * HEIGHT` bytes per image.
pub fn read_images(path: &Path) -> Result<Vec<Vec<u8>>> {
    // 16-byte header: magic, count, rows, columns
    let mut f = File::open(path)?;
    let magic = read_u32(&mut f)?;
    if magic != IMAGES_MAGIC {
        return Err(invalid(path, format!("bad image magic number {magic}")));
    }
    let size = read_u32(&mut f)? as usize;
    let rows = read_u32(&mut f)? as usize;
    let cols = read_u32(&mut f)? as usize;
    if (rows, cols) != (HEIGHT, WIDTH) {
        return Err(invalid(path, format!("expected 28x28 images, got {rows}x{cols}")));
    }

    let expected = 16 + PIXELS as u64 * size as u64;
    check_len(&f, path, expected, size)?;

    let mut buf_images: Vec<u8> = vec![0u8; PIXELS * size];
    f.read_exact(&mut buf_images)?;

    Ok(buf_images
        .chunks(PIXELS)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Reads an IDX1 label file.
pub fn read_labels(path: &Path) -> Result<Vec<u8>> {
    // 8-byte header: magic, count
    let mut f = File::open(path)?;
    let magic = read_u32(&mut f)?;
    if magic != LABELS_MAGIC {
        return Err(invalid(path, format!("bad label magic number {magic}")));
    }
    let size = read_u32(&mut f)? as usize;

    check_len(&f, path, 8 + size as u64, size)?;

    let mut buf_labels: Vec<u8> = vec![0u8; size];
    f.read_exact(&mut buf_labels)?;

    Ok(buf_labels)
}

/// How raw brightness values are presented to a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// Brightness as-is, in `[0, 255]`.
    #[default]
    Raw,
    /// `1` when the brightness is at least 128, `0` otherwise.
    Binarized,
}

impl PixelFormat {
    pub fn apply(&self, brightness: f32) -> f32 {
        match self {
            PixelFormat::Raw => brightness,
            PixelFormat::Binarized => {
                if brightness >= 128. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MnistBatcher {
    pub format: PixelFormat,
}

impl MnistBatcher {
    pub fn new(format: PixelFormat) -> Self {
        Self { format }
    }
}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Flattened images, formatted by the batcher's [`PixelFormat`].
    ///
    /// # Shape
    /// [batch_size, WIDTH * HEIGHT]
    pub images: Tensor<B, 2>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let pixels: Vec<f32> = items
            .into_iter()
            .flat_map(|item| item.image)
            .map(|brightness| self.format.apply(brightness))
            .collect();
        let data = TensorData::new(pixels, [batch_size, PIXELS]).convert::<B::FloatElem>();
        let images = Tensor::<B, 2>::from_data(data, device);

        MnistBatch { images }
    }
}
