use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use burn::tensor::TensorData;
use zip::{
    CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions,
};

use crate::{
    ArchiveError,
    npy::{decode_npy, encode_npy},
};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read every array of an `.npz` archive, keyed by name without the `.npy` suffix.
pub fn read_npz(path: &Path) -> Result<BTreeMap<String, TensorData>, ArchiveError> {
    let _span = tracing::trace_span!("read_npz").entered();

    let file = File::open(path).map_err(io_error(path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut arrays = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let entry_name = entry.name().to_owned();
        let name = entry_name
            .strip_suffix(".npy")
            .unwrap_or(&entry_name)
            .to_owned();

        let entry_error = |e| ArchiveError::Entry {
            name: name.clone(),
            source: Box::new(e),
        };

        // The declared size comes from the archive and isn't trusted for allocation.
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| entry_error(ArchiveError::Zip(ZipError::Io(e))))?;

        let data = decode_npy(&bytes).map_err(entry_error)?;
        log::debug!("Read array '{name}' with shape {:?}", data.shape);
        arrays.insert(name, data);
    }

    Ok(arrays)
}

/// Read a standalone `.npy` file.
pub fn read_npy_file(path: &Path) -> Result<TensorData, ArchiveError> {
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    decode_npy(&bytes)
}

/// Write arrays into an uncompressed `.npz` archive, the same layout `numpy.savez` produces.
pub fn write_npz<'a>(
    path: &Path,
    arrays: impl IntoIterator<Item = (&'a str, &'a TensorData)>,
) -> Result<(), ArchiveError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, data) in arrays {
        zip.start_file(format!("{name}.npy"), options)?;
        let bytes = encode_npy(data)?;
        zip.write_all(&bytes).map_err(io_error(path))?;
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(io_error(path))?;
    Ok(())
}
