//! Test helpers for the survey simulator
//!
//! Scratch directories plus writers for the CSV inputs the simulator reads
//! (dither schedules and object catalogs).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum FixtureError {
    #[error("Failed to prepare scratch space: {0}")]
    Io(#[from] std::io::Error),
}

/// One dither schedule row, angles in degrees
#[derive(Debug, Clone, Copy)]
pub struct DitherFixture {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub pa_deg: f64,
    pub mjd: f64,
    pub filter: &'static str,
}

/// One catalog row, angles in radians
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectFixture {
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
    pub size: Option<f64>,
    pub hostid: Option<i64>,
    /// Active window `(start_mjd, end_mjd)`
    pub window: Option<(f64, f64)>,
}

impl ObjectFixture {
    pub fn at(ra: f64, dec: f64, mag: f64) -> Self {
        Self {
            ra,
            dec,
            mag,
            ..Self::default()
        }
    }
}

fn cell(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// A temporary directory that is removed when dropped.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Result<Self, FixtureError> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Write `contents` to `name` inside the scratch directory
    pub fn write<P: AsRef<Path>>(&self, name: P, contents: &str) -> Result<PathBuf, FixtureError> {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Dither schedule CSV with columns `ra,dec,pa,date,filter`
    pub fn dither_csv(&self, name: &str, rows: &[DitherFixture]) -> Result<PathBuf, FixtureError> {
        let mut text = String::from("ra,dec,pa,date,filter\n");
        for row in rows {
            let _ = writeln!(
                text,
                "{},{},{},{},{}",
                row.ra_deg, row.dec_deg, row.pa_deg, row.mjd, row.filter
            );
        }
        self.write(name, &text)
    }

    /// Catalog CSV with columns `ra,dec,mag,size,hostid,start_mjd,end_mjd`
    pub fn catalog_csv(&self, name: &str, rows: &[ObjectFixture]) -> Result<PathBuf, FixtureError> {
        let mut text = String::from("ra,dec,mag,size,hostid,start_mjd,end_mjd\n");
        for row in rows {
            let _ = writeln!(
                text,
                "{},{},{},{},{},{},{}",
                row.ra,
                row.dec,
                row.mag,
                cell(row.size),
                cell(row.hostid),
                cell(row.window.map(|w| w.0)),
                cell(row.window.map(|w| w.1)),
            );
        }
        self.write(name, &text)
    }
}
