use crate::candle_data_loader::InMemoryImages;
use crate::error::{FlowVaeError, Result};

use candle_core::{Device, Tensor};
use clap::ValueEnum;
use flate2::read::GzDecoder;
use log::info;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

pub const MNIST_DIM: usize = 28 * 28;
pub const CIFAR_SHAPE: [usize; 3] = [3, 32, 32];
const CIFAR_RECORD: usize = 1 + 3 * 32 * 32;
const CIFAR_NUM_LABELS: usize = 10;
const CIFAR_PER_LABEL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetKind {
    Mnist,
    BinarisedMnist,
    FashionMnist,
    Cifar10,
}

/// Load one of the supported image corpora
///
/// * `data_path` - root data directory
/// * `train` - training split or test split
/// * `balanced` - small balanced training subset (binarised MNIST, CIFAR-10)
pub fn load_dataset(
    kind: DatasetKind,
    data_path: &Path,
    train: bool,
    balanced: bool,
) -> Result<InMemoryImages> {
    match kind {
        DatasetKind::Mnist => mnist(data_path, train),
        DatasetKind::BinarisedMnist => binarised_mnist(data_path, train, balanced),
        DatasetKind::FashionMnist => fashion_mnist(data_path, train),
        DatasetKind::Cifar10 => cifar10(data_path, train, balanced),
    }
}

/// MNIST digits from `data_path/MNIST/raw`, binarised at 0.5 and
/// flattened to 784 features; shuffled.
pub fn mnist(data_path: &Path, train: bool) -> Result<InMemoryImages> {
    idx_image_dataset(&data_path.join("MNIST").join("raw"), train)
}

/// Fashion-MNIST from `data_path/FashionMNIST/raw`, binarised at 0.5
/// and flattened to 784 features; shuffled.
pub fn fashion_mnist(data_path: &Path, train: bool) -> Result<InMemoryImages> {
    idx_image_dataset(&data_path.join("FashionMNIST").join("raw"), train)
}

/// The fixed binarisation of MNIST stored as `.amat` text under
/// `data_path/binarizedMNIST`.
///
/// * train: `train` rows followed by `valid` rows, shuffled
/// * train + balanced: the `local` rows in file order, not shuffled
/// * test: `test` rows, shuffled
///
/// Labels are dummy `-1`.
pub fn binarised_mnist(data_path: &Path, train: bool, balanced: bool) -> Result<InMemoryImages> {
    let amat = |split: &str| {
        data_path
            .join("binarizedMNIST")
            .join(format!("binarized_mnist_{}.amat", split))
    };

    let rows = match (train, balanced) {
        (true, true) => read_amat(&amat("local"))?,
        (true, false) => {
            let mut rows = read_amat(&amat("train"))?;
            rows.extend(read_amat(&amat("valid"))?);
            rows
        }
        (false, _) => read_amat(&amat("test"))?,
    };

    let n = rows.len();
    let d = rows.first().map(|r| r.len()).unwrap_or(0);
    if let Some(bad) = rows.iter().position(|r| r.len() != d) {
        return Err(FlowVaeError::Data(format!(
            "row {} has {} values, expected {}",
            bad,
            rows[bad].len(),
            d
        )));
    }

    let images = Tensor::from_vec(rows.concat(), (n, d), &Device::Cpu)?;
    let labels = Tensor::from_vec(vec![-1i64; n], n, &Device::Cpu)?;
    info!("binarised MNIST: {} x {} (train = {}, balanced = {})", n, d, train, balanced);

    into_images(images, labels, !(train && balanced))
}

/// CIFAR-10 binary batches under `data_path/cifar-10-batches-bin`,
/// binarised at 0.5 and kept as `3 x 32 x 32`.
///
/// With `train && balanced`, the first 10 samples of each label are
/// taken, grouped by label in label order, and not shuffled.
pub fn cifar10(data_path: &Path, train: bool, balanced: bool) -> Result<InMemoryImages> {
    let dir = data_path.join("cifar-10-batches-bin");
    let files: Vec<PathBuf> = if train {
        (1..=5)
            .map(|b| dir.join(format!("data_batch_{}.bin", b)))
            .collect()
    } else {
        vec![dir.join("test_batch.bin")]
    };

    let mut raw = vec![];
    for f in files.iter() {
        let bytes = read_bytes(f)?;
        if bytes.len() % CIFAR_RECORD != 0 {
            return Err(FlowVaeError::Data(format!(
                "{}: {} bytes is not a whole number of records",
                f.display(),
                bytes.len()
            )));
        }
        raw.extend(bytes);
    }

    let records: Vec<&[u8]> = raw.chunks(CIFAR_RECORD).collect();
    let labels: Vec<i64> = records.iter().map(|r| r[0] as i64).collect();

    let selected: Vec<usize> = if train && balanced {
        balanced_indices(&labels, CIFAR_NUM_LABELS, CIFAR_PER_LABEL)?
    } else {
        (0..records.len()).collect()
    };

    let n = selected.len();
    let pixels: Vec<f32> = selected
        .par_iter()
        .flat_map_iter(|&i| records[i][1..].iter().map(|&b| binarise(b)))
        .collect();
    let labels: Vec<i64> = selected.iter().map(|&i| labels[i]).collect();

    let [c, h, w] = CIFAR_SHAPE;
    let images = Tensor::from_vec(pixels, (n, c, h, w), &Device::Cpu)?;
    let labels = Tensor::from_vec(labels, n, &Device::Cpu)?;
    info!("CIFAR-10: {} images (train = {}, balanced = {})", n, train, balanced);

    into_images(images, labels, !(train && balanced))
}

/// First `per_label` indices of each label, label-major
pub fn balanced_indices(labels: &[i64], num_labels: usize, per_label: usize) -> Result<Vec<usize>> {
    let mut label_indices: Vec<Vec<usize>> = vec![vec![]; num_labels];

    for (i, &l) in labels.iter().enumerate() {
        if label_indices.iter().all(|v| v.len() >= per_label) {
            break;
        }
        let l = usize::try_from(l)
            .ok()
            .filter(|&l| l < num_labels)
            .ok_or_else(|| FlowVaeError::Data(format!("label {} out of range", l)))?;
        label_indices[l].push(i);
    }

    if let Some(short) = label_indices.iter().position(|v| v.len() < per_label) {
        return Err(FlowVaeError::Data(format!(
            "only {} samples of label {}, need {}",
            label_indices[short].len(),
            short,
            per_label
        )));
    }

    Ok(label_indices
        .into_iter()
        .flat_map(|v| v.into_iter().take(per_label))
        .collect())
}

fn idx_image_dataset(raw_dir: &Path, train: bool) -> Result<InMemoryImages> {
    let prefix = if train { "train" } else { "t10k" };
    let (img_dims, img_bytes) = read_idx(&raw_dir.join(format!("{}-images-idx3-ubyte", prefix)))?;
    let (lab_dims, lab_bytes) = read_idx(&raw_dir.join(format!("{}-labels-idx1-ubyte", prefix)))?;

    if img_dims.len() != 3 || lab_dims.len() != 1 || img_dims[0] != lab_dims[0] {
        return Err(FlowVaeError::Data(format!(
            "{}: image dims {:?} vs. label dims {:?}",
            raw_dir.display(),
            img_dims,
            lab_dims
        )));
    }

    let n = img_dims[0];
    let d = img_dims[1] * img_dims[2];
    let pixels: Vec<f32> = img_bytes.par_iter().map(|&b| binarise(b)).collect();
    let labels: Vec<i64> = lab_bytes.iter().map(|&b| b as i64).collect();

    let images = Tensor::from_vec(pixels, (n, d), &Device::Cpu)?;
    let labels = Tensor::from_vec(labels, n, &Device::Cpu)?;
    info!("{}: {} x {} (train = {})", raw_dir.display(), n, d, train);

    into_images(images, labels, true)
}

fn into_images(images: Tensor, labels: Tensor, shuffle: bool) -> Result<InMemoryImages> {
    InMemoryImages::new(images, labels, shuffle).map_err(|e| FlowVaeError::Data(e.to_string()))
}

/// `ToTensor` scaling to `[0, 1]` followed by `>= 0.5`
fn binarise(b: u8) -> f32 {
    if (b as f32) / 255. >= 0.5 {
        1.
    } else {
        0.
    }
}

/// Read a file, falling back to `<path>.gz` when the plain file is missing
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut buf = vec![];
    if path.exists() {
        if path.extension().is_some_and(|e| e == "gz") {
            GzDecoder::new(File::open(path)?).read_to_end(&mut buf)?;
        } else {
            File::open(path)?.read_to_end(&mut buf)?;
        }
    } else {
        let mut gz = path.as_os_str().to_owned();
        gz.push(".gz");
        GzDecoder::new(File::open(PathBuf::from(gz))?).read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// IDX file of unsigned bytes: `0 0 0x08 ndim`, `ndim` big-endian
/// `u32` dimensions, then the data
pub fn read_idx(path: &Path) -> Result<(Vec<usize>, Vec<u8>)> {
    let bytes = read_bytes(path)?;
    let bad = |msg: &str| FlowVaeError::Data(format!("{}: {}", path.display(), msg));

    if bytes.len() < 4 || bytes[0] != 0 || bytes[1] != 0 {
        return Err(bad("not an IDX file"));
    }
    if bytes[2] != 0x08 {
        return Err(bad("only unsigned byte IDX data is supported"));
    }

    let ndim = bytes[3] as usize;
    let header = 4 + 4 * ndim;
    if bytes.len() < header {
        return Err(bad("truncated header"));
    }

    let dims: Vec<usize> = bytes[4..header]
        .chunks(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as usize)
        .collect();

    let ntot: usize = dims.iter().product();
    if bytes.len() - header != ntot {
        return Err(bad(&format!(
            "expected {} data bytes, found {}",
            ntot,
            bytes.len() - header
        )));
    }

    Ok((dims, bytes[header..].to_vec()))
}

/// Whitespace-separated numbers, one sample per line
pub fn read_amat(path: &Path) -> Result<Vec<Vec<f32>>> {
    let lines: Vec<String> = BufReader::new(File::open(path)?)
        .lines()
        .collect::<std::io::Result<_>>()?;

    lines
        .par_iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            l.split_whitespace()
                .map(|t| {
                    t.parse::<f32>().map_err(|e| {
                        FlowVaeError::Data(format!("{}: {:?}: {}", path.display(), t, e))
                    })
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}
