//! Append-only stamp streams.
//!
//! Each worker owns one stream per object class per pointing. Records are
//! appended as consecutive bincode frames as soon as they are rendered, so
//! memory use stays flat no matter how many objects a pointing holds.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use super::catalog::ObjectClass;
use super::render::StampRecord;
use crate::error::Result;

#[derive(Debug)]
pub struct StampStream {
    class: ObjectClass,
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl StampStream {
    /// Create (or truncate) the stream file at `path`
    pub fn create(class: ObjectClass, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            class,
            path,
            writer,
            written: 0,
        })
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn append(&mut self, record: &StampRecord) -> Result<()> {
        bincode::serialize_into(&mut self.writer, record)?;
        self.written += 1;
        Ok(())
    }

    /// Flush and close; returns the file path and record count
    pub fn finish(mut self) -> Result<(PathBuf, usize)> {
        self.writer.flush()?;
        Ok((self.path, self.written))
    }
}

/// Read every record of a stream, gzip-compressed (`.gz`) or raw.
pub fn read_stamps<P: AsRef<Path>>(path: P) -> Result<Vec<StampRecord>> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    read_frames(reader)
}

fn read_frames(mut reader: impl Read) -> Result<Vec<StampRecord>> {
    let mut records = Vec::new();
    loop {
        match bincode::deserialize_from::<_, StampRecord>(&mut reader) {
            Ok(record) => records.push(record),
            Err(err) => match *err {
                bincode::ErrorKind::Io(ref io)
                    if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                _ => return Err(err.into()),
            },
        }
    }
    Ok(records)
}
