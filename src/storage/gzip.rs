use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{AppError, AppResult, StorageError};

pub const GZIP_ENCODING: &str = "gzip";

pub(crate) fn compress(key: &str, body: &[u8]) -> AppResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .and_then(|()| encoder.finish())
        .map_err(|err| {
            AppError::storage(StorageError::Compress {
                key: key.to_owned(),
                source: err,
            })
        })
}

pub(crate) fn decompress(key: &str, body: &[u8]) -> AppResult<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut decoded)
        .map_err(|err| {
            AppError::storage(StorageError::Decompress {
                key: key.to_owned(),
                source: err,
            })
        })?;
    Ok(decoded)
}
