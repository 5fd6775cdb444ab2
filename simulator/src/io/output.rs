//! Output naming, overwrite policy and two-tier storage.
//!
//! Every artifact name is a pure function of the run name, filter, dither,
//! detector and (for stamp streams) worker rank:
//!
//! - images: `{out}/images/{run}_{filter}_{dither}_{sca}.fits.gz`
//! - truth:  `{out}/truth/{run}_index_{filter}_{dither}_{sca}[_star|_sn].fits`
//! - stamps: `{out}/stamps/{run}_{filter}_{dither}_{sca}_{rank}[_star|_supernova].bin.gz`
//!
//! With a temporary directory configured, artifacts are produced under it
//! first and only the finished, compressed file is copied to the durable
//! output root.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;

use super::fits::{self, ImageHeader};
use crate::error::{Result, SimError};
use crate::hardware::DetectorId;
use crate::photometry::Filter;
use crate::pipeline::accumulate::IndexRow;
use crate::pipeline::catalog::ObjectClass;
use crate::pipeline::stream::StampStream;

/// Gzip `src` into `dst`
pub fn gzip_file(src: &Path, dst: &Path) -> Result<()> {
    let mut input = BufReader::new(File::open(src)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dst)?), Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

fn with_gz(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    out_root: PathBuf,
    tmp_root: Option<PathBuf>,
    run_name: String,
    overwrite: bool,
}

impl OutputWriter {
    pub fn new(
        out_root: impl Into<PathBuf>,
        tmp_root: Option<PathBuf>,
        run_name: impl Into<String>,
        overwrite: bool,
    ) -> Self {
        Self {
            out_root: out_root.into(),
            tmp_root,
            run_name: run_name.into(),
            overwrite,
        }
    }

    pub fn out_root(&self) -> &Path {
        &self.out_root
    }

    /// Where artifacts are produced before promotion
    fn staging_root(&self) -> &Path {
        self.tmp_root.as_deref().unwrap_or(&self.out_root)
    }

    fn name(&self, root: &Path, category: &str, stem: String) -> PathBuf {
        root.join(category).join(format!("{}_{stem}", self.run_name))
    }

    fn image_stem(filter: Filter, dither: usize, detector: DetectorId) -> String {
        format!("{filter}_{dither}_{detector}.fits")
    }

    fn truth_stem(class: ObjectClass, filter: Filter, dither: usize, detector: DetectorId) -> String {
        format!("index_{filter}_{dither}_{detector}{}.fits", class.truth_suffix())
    }

    fn stamp_stem(
        class: ObjectClass,
        filter: Filter,
        dither: usize,
        detector: DetectorId,
        rank: usize,
    ) -> String {
        format!("{filter}_{dither}_{detector}_{rank}{}.bin", class.stamp_suffix())
    }

    pub fn image_path(&self, filter: Filter, dither: usize, detector: DetectorId) -> PathBuf {
        with_gz(&self.name(&self.out_root, "images", Self::image_stem(filter, dither, detector)))
    }

    pub fn truth_path(
        &self,
        class: ObjectClass,
        filter: Filter,
        dither: usize,
        detector: DetectorId,
    ) -> PathBuf {
        self.name(&self.out_root, "truth", Self::truth_stem(class, filter, dither, detector))
    }

    pub fn stamp_path(
        &self,
        class: ObjectClass,
        filter: Filter,
        dither: usize,
        detector: DetectorId,
        rank: usize,
    ) -> PathBuf {
        with_gz(&self.name(
            &self.out_root,
            "stamps",
            Self::stamp_stem(class, filter, dither, detector, rank),
        ))
    }

    /// Has this (detector, dither, filter) unit already produced its truth table?
    pub fn already_simulated(&self, detector: DetectorId, dither: usize, filter: Filter) -> bool {
        self.truth_path(ObjectClass::Galaxy, filter, dither, detector)
            .exists()
    }

    /// Make room for a durable artifact of the (detector, dither, filter) unit.
    ///
    /// Leftovers of an unfinished unit are replaced. Once the unit's galaxy
    /// truth table exists, its artifacts are replaced only with `overwrite`.
    fn claim(&self, path: &Path, detector: DetectorId, dither: usize, filter: Filter) -> Result<()> {
        if path.exists() {
            if !self.overwrite {
                if self.already_simulated(detector, dither, filter) {
                    return Err(SimError::OutputExists(path.to_path_buf()));
                }
                log::warn!("Replacing leftover {} of an unfinished unit", path.display());
            }
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Copy a finished staging artifact to `durable` unless they coincide
    fn promote(&self, staged: &Path, durable: &Path) -> Result<()> {
        if staged != durable {
            std::fs::copy(staged, durable)?;
            log::debug!("Copied {} to {}", staged.display(), durable.display());
        }
        Ok(())
    }

    /// Open this worker's stamp stream for one class
    pub fn open_stream(
        &self,
        class: ObjectClass,
        filter: Filter,
        dither: usize,
        detector: DetectorId,
        rank: usize,
    ) -> Result<StampStream> {
        let durable = self.stamp_path(class, filter, dither, detector, rank);
        self.claim(&durable, detector, dither, filter)?;
        let raw = self.name(
            self.staging_root(),
            "stamps",
            Self::stamp_stem(class, filter, dither, detector, rank),
        );
        StampStream::create(class, raw)
    }

    /// Close, compress and promote a stamp stream opened by [`open_stream`](Self::open_stream).
    pub fn finish_stream(&self, stream: StampStream, durable: &Path) -> Result<PathBuf> {
        let (raw, count) = stream.finish()?;
        let staged = with_gz(&raw);
        gzip_file(&raw, &staged)?;
        std::fs::remove_file(&raw)?;
        self.promote(&staged, durable)?;
        log::debug!("Wrote {count} stamps to {}", durable.display());
        Ok(durable.to_path_buf())
    }

    /// Write the finalized detector image (compressed)
    pub fn write_image(
        &self,
        pixels: &Array2<f32>,
        header: &ImageHeader,
        filter: Filter,
        dither: usize,
        detector: DetectorId,
    ) -> Result<PathBuf> {
        let durable = self.image_path(filter, dither, detector);
        self.claim(&durable, detector, dither, filter)?;

        let raw = self.name(
            self.staging_root(),
            "images",
            Self::image_stem(filter, dither, detector),
        );
        if let Some(parent) = raw.parent() {
            std::fs::create_dir_all(parent)?;
        }
        fits::write_image(&raw, pixels, header)?;
        let staged = with_gz(&raw);
        gzip_file(&raw, &staged)?;
        std::fs::remove_file(&raw)?;
        self.promote(&staged, &durable)?;
        log::info!("Saving detector image to {}", durable.display());
        Ok(durable)
    }

    /// Write one class's truth table. The galaxy table marks the unit as
    /// simulated, so callers write it last.
    pub fn write_truth(
        &self,
        class: ObjectClass,
        rows: &[IndexRow],
        filter: Filter,
        dither: usize,
        detector: DetectorId,
    ) -> Result<PathBuf> {
        let durable = self.truth_path(class, filter, dither, detector);
        self.claim(&durable, detector, dither, filter)?;

        let staged = self.name(
            self.staging_root(),
            "truth",
            Self::truth_stem(class, filter, dither, detector),
        );
        if let Some(parent) = staged.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let n = fits::write_truth(&staged, class, rows)?;
        self.promote(&staged, &durable)?;
        log::info!("Saving {n} {class} to {}", durable.display());
        Ok(durable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stream::read_stamps;

    fn det(id: u8) -> DetectorId {
        DetectorId::new(id).unwrap()
    }

    #[test]
    fn test_naming() {
        let writer = OutputWriter::new("/data/out", None, "run1", true);
        assert_eq!(
            writer.image_path(Filter::J129, 5, det(3)),
            PathBuf::from("/data/out/images/run1_J129_5_3.fits.gz")
        );
        assert_eq!(
            writer.truth_path(ObjectClass::Transient, Filter::H158, 12, det(18)),
            PathBuf::from("/data/out/truth/run1_index_H158_12_18_sn.fits")
        );
        assert_eq!(
            writer.stamp_path(ObjectClass::Star, Filter::Y106, 0, det(1), 2),
            PathBuf::from("/data/out/stamps/run1_Y106_0_1_2_star.bin.gz")
        );
    }

    #[test]
    fn test_already_simulated_after_truth_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, "run", false);
        assert!(!writer.already_simulated(det(3), 5, Filter::J129));

        writer
            .write_truth(ObjectClass::Galaxy, &[], Filter::J129, 5, det(3))
            .unwrap();
        assert!(writer.already_simulated(det(3), 5, Filter::J129));
        assert!(!writer.already_simulated(det(4), 5, Filter::J129));
        assert!(!writer.already_simulated(det(3), 5, Filter::H158));
    }

    #[test]
    fn test_overwrite_policy() {
        let dir = tempfile::tempdir().unwrap();
        let strict = OutputWriter::new(dir.path(), None, "run", false);
        strict
            .write_truth(ObjectClass::Galaxy, &[], Filter::J129, 1, det(1))
            .unwrap();
        let err = strict
            .write_truth(ObjectClass::Galaxy, &[], Filter::J129, 1, det(1))
            .unwrap_err();
        assert!(matches!(err, SimError::OutputExists(_)));
        let err = strict
            .open_stream(ObjectClass::Star, Filter::J129, 1, det(1), 0)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, SimError::OutputExists(_)));

        let lax = OutputWriter::new(dir.path(), None, "run", true);
        lax.write_truth(ObjectClass::Galaxy, &[], Filter::J129, 1, det(1))
            .unwrap();
    }

    #[test]
    fn test_unfinished_unit_leftovers_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), None, "t", false);
        let image = writer.image_path(Filter::J129, 5, det(3));
        let truth = writer.truth_path(ObjectClass::Star, Filter::J129, 5, det(3));
        let shard = writer.stamp_path(ObjectClass::Galaxy, Filter::J129, 5, det(3), 1);
        for path in [&image, &truth, &shard] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"stale").unwrap();
        }
        assert!(!writer.already_simulated(det(3), 5, Filter::J129));

        let pixels = Array2::<f32>::zeros((4, 4));
        let header = ImageHeader {
            filter: "J129".to_string(),
            dither: 5,
            sca: 3,
            ra_targ: 10.0,
            dec_targ: 20.0,
            pa_fpa: 0.0,
            mjd_obs: 59000.0,
            date_obs: "2020-05-31T00:00:00+00:00".to_string(),
            gain: 1.0,
            bunit: "electrons".to_string(),
        };
        writer
            .write_image(&pixels, &header, Filter::J129, 5, det(3))
            .unwrap();
        writer
            .write_truth(ObjectClass::Star, &[], Filter::J129, 5, det(3))
            .unwrap();
        let stream = writer
            .open_stream(ObjectClass::Galaxy, Filter::J129, 5, det(3), 1)
            .unwrap();
        writer.finish_stream(stream, &shard).unwrap();

        assert!(read_stamps(&shard).unwrap().is_empty());
        assert_ne!(std::fs::read(&image).unwrap(), b"stale");
    }

    #[test]
    fn test_two_tier_stream_promotion() {
        let out = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(out.path(), Some(tmp.path().to_path_buf()), "run", true);

        let stream = writer
            .open_stream(ObjectClass::Galaxy, Filter::J129, 2, det(6), 1)
            .unwrap();
        assert!(stream.path().starts_with(tmp.path()));

        let durable = writer.stamp_path(ObjectClass::Galaxy, Filter::J129, 2, det(6), 1);
        let promoted = writer.finish_stream(stream, &durable).unwrap();
        assert_eq!(promoted, durable);
        assert!(durable.exists());
        assert!(tmp.path().join("stamps/run_J129_2_6_1.bin.gz").exists());
        assert!(!tmp.path().join("stamps/run_J129_2_6_1.bin").exists());
        assert!(read_stamps(&durable).unwrap().is_empty());
    }
}
