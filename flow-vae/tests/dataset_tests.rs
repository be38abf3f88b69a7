use candle_core::Device;
use flate2::write::GzEncoder;
use flate2::Compression;
use flow_vae::candle_data_loader::DataLoader;
use flow_vae::candle_image_datasets::*;
use flow_vae::error::{FlowVaeError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

fn idx_bytes(dims: &[u32], data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8, 0, 0x08, dims.len() as u8];
    for d in dims {
        out.extend_from_slice(&d.to_be_bytes());
    }
    out.extend_from_slice(data);
    out
}

fn write_gz(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut enc = GzEncoder::new(fs::File::create(path)?, Compression::default());
    enc.write_all(bytes)?;
    enc.finish()?;
    Ok(())
}

/// three 2x2 training images, two of them test images stored gzipped
fn mnist_fixture(root: &Path, dir: &str) -> std::io::Result<()> {
    let raw = root.join(dir).join("raw");
    fs::create_dir_all(&raw)?;

    let train_pixels = [0u8, 127, 128, 255, 255, 255, 0, 0, 10, 200, 90, 160];
    fs::write(
        raw.join("train-images-idx3-ubyte"),
        idx_bytes(&[3, 2, 2], &train_pixels),
    )?;
    fs::write(raw.join("train-labels-idx1-ubyte"), idx_bytes(&[3], &[7, 1, 4]))?;

    write_gz(
        &raw.join("t10k-images-idx3-ubyte.gz"),
        &idx_bytes(&[2, 2, 2], &[255, 0, 255, 0, 1, 2, 3, 4]),
    )?;
    write_gz(&raw.join("t10k-labels-idx1-ubyte.gz"), &idx_bytes(&[2], &[9, 0]))?;
    Ok(())
}

#[test]
fn mnist_is_binarised_and_flattened() -> Result<()> {
    let dir = tempfile::tempdir()?;
    mnist_fixture(dir.path(), "MNIST")?;

    let data = load_dataset(DatasetKind::Mnist, dir.path(), true, false)?;
    assert_eq!(data.num_samples(), 3);
    assert_eq!(data.sample_shape(), &[4]);
    assert!(data.is_shuffled());
    assert_eq!(
        data.images().to_vec2::<f32>()?,
        vec![
            vec![0., 0., 1., 1.],
            vec![1., 1., 0., 0.],
            vec![0., 1., 0., 1.]
        ]
    );
    assert_eq!(data.labels().to_vec1::<i64>()?, vec![7, 1, 4]);
    Ok(())
}

#[test]
fn gzipped_test_split_is_read() -> Result<()> {
    let dir = tempfile::tempdir()?;
    mnist_fixture(dir.path(), "FashionMNIST")?;

    let data = load_dataset(DatasetKind::FashionMnist, dir.path(), false, false)?;
    assert_eq!(data.num_samples(), 2);
    assert_eq!(data.labels().to_vec1::<i64>()?, vec![9, 0]);
    assert_eq!(data.images().to_vec2::<f32>()?[0], vec![1., 0., 1., 0.]);
    Ok(())
}

#[test]
fn idx_with_wrong_magic_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad-idx");
    fs::write(&path, [1u8, 0, 8, 1, 0, 0, 0, 1, 5])?;
    assert!(matches!(read_idx(&path), Err(FlowVaeError::Data(_))));
    Ok(())
}

#[test]
fn missing_files_are_io_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(matches!(
        load_dataset(DatasetKind::Mnist, dir.path(), true, false),
        Err(FlowVaeError::Io(_))
    ));
    Ok(())
}

fn amat_fixture(root: &Path) -> std::io::Result<()> {
    let dir = root.join("binarizedMNIST");
    fs::create_dir_all(&dir)?;
    let amat = |split: &str| dir.join(format!("binarized_mnist_{}.amat", split));
    fs::write(amat("train"), "0 1 0\n1 1 1\n")?;
    fs::write(amat("valid"), "1 0 0\n")?;
    fs::write(amat("test"), "0 0 1\n\n")?;
    fs::write(amat("local"), "1 0 1\n0 1 1\n")?;
    Ok(())
}

#[test]
fn binarised_mnist_concatenates_train_and_valid() -> Result<()> {
    let dir = tempfile::tempdir()?;
    amat_fixture(dir.path())?;

    let data = load_dataset(DatasetKind::BinarisedMnist, dir.path(), true, false)?;
    assert!(data.is_shuffled());
    assert_eq!(
        data.images().to_vec2::<f32>()?,
        vec![vec![0., 1., 0.], vec![1., 1., 1.], vec![1., 0., 0.]]
    );
    assert_eq!(data.labels().to_vec1::<i64>()?, vec![-1; 3]);

    let test = load_dataset(DatasetKind::BinarisedMnist, dir.path(), false, true)?;
    assert_eq!(test.num_samples(), 1);
    Ok(())
}

#[test]
fn balanced_binarised_mnist_keeps_file_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    amat_fixture(dir.path())?;

    let mut data = load_dataset(DatasetKind::BinarisedMnist, dir.path(), true, true)?;
    assert!(!data.is_shuffled());

    data.shuffle_minibatch(1)?;
    let first = data.minibatch_data(0, &Device::Cpu)?;
    assert_eq!(first.input.to_vec2::<f32>()?, vec![vec![1., 0., 1.]]);
    Ok(())
}

#[test]
fn ragged_amat_rows_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    amat_fixture(dir.path())?;
    fs::write(
        dir.path().join("binarizedMNIST").join("binarized_mnist_test.amat"),
        "0 1\n1 1 1\n",
    )?;
    assert!(matches!(
        load_dataset(DatasetKind::BinarisedMnist, dir.path(), false, false),
        Err(FlowVaeError::Data(_))
    ));
    Ok(())
}

const RECORD: usize = 1 + 3 * 32 * 32;

/// 5 training batches of 22 records each, label `i % 10` for the
/// `i`-th record overall; pixels of even labels are bright
fn cifar_fixture(root: &Path) -> std::io::Result<()> {
    let dir = root.join("cifar-10-batches-bin");
    fs::create_dir_all(&dir)?;

    let record = |i: usize| {
        let label = (i % 10) as u8;
        let mut r = vec![label];
        r.extend(std::iter::repeat(if label % 2 == 0 { 255u8 } else { 3 }).take(RECORD - 1));
        r
    };

    for b in 0..5 {
        let bytes: Vec<u8> = (b * 22..(b + 1) * 22).flat_map(record).collect();
        fs::write(dir.join(format!("data_batch_{}.bin", b + 1)), bytes)?;
    }
    let test: Vec<u8> = (0..3).flat_map(record).collect();
    fs::write(dir.join("test_batch.bin"), test)?;
    Ok(())
}

#[test]
fn cifar_keeps_channel_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    cifar_fixture(dir.path())?;

    let train = load_dataset(DatasetKind::Cifar10, dir.path(), true, false)?;
    assert_eq!(train.num_samples(), 110);
    assert_eq!(train.sample_shape(), &[3, 32, 32]);
    assert!(train.is_shuffled());

    let test = load_dataset(DatasetKind::Cifar10, dir.path(), false, true)?;
    assert_eq!(test.num_samples(), 3);
    assert_eq!(test.labels().to_vec1::<i64>()?, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn balanced_cifar_groups_ten_per_label() -> Result<()> {
    let dir = tempfile::tempdir()?;
    cifar_fixture(dir.path())?;

    let data = load_dataset(DatasetKind::Cifar10, dir.path(), true, true)?;
    assert_eq!(data.num_samples(), 100);
    assert!(!data.is_shuffled());

    let labels = data.labels().to_vec1::<i64>()?;
    let expected: Vec<i64> = (0..10).flat_map(|l| std::iter::repeat(l).take(10)).collect();
    assert_eq!(labels, expected);

    let brightness = data.images().flatten_from(1)?.mean(1)?.to_vec1::<f32>()?;
    for (l, v) in labels.iter().zip(brightness) {
        assert_eq!(v, if l % 2 == 0 { 1. } else { 0. });
    }
    Ok(())
}

#[test]
fn truncated_cifar_batch_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    cifar_fixture(dir.path())?;
    fs::write(
        dir.path().join("cifar-10-batches-bin").join("test_batch.bin"),
        vec![0u8; RECORD + 5],
    )?;
    assert!(matches!(
        load_dataset(DatasetKind::Cifar10, dir.path(), false, false),
        Err(FlowVaeError::Data(_))
    ));
    Ok(())
}
