//! FITS encoding of detector images and truth tables.
//!
//! Images are written as a single 32-bit float image extension named `SCI`
//! carrying the pointing metadata in its header. Truth tables are binary
//! table extensions named `TRUTH`, one row per realized object.

use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::Array2;

use crate::error::{Result, SimError};
use crate::pipeline::accumulate::IndexRow;
use crate::pipeline::catalog::ObjectClass;

/// Extension name of the detector image
pub const IMAGE_EXTNAME: &str = "SCI";

/// Extension name of a truth table
pub const TRUTH_EXTNAME: &str = "TRUTH";

/// Pointing metadata written into the image header.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHeader {
    pub filter: String,
    pub dither: i64,
    pub sca: i64,
    /// Boresight, degrees
    pub ra_targ: f64,
    pub dec_targ: f64,
    pub pa_fpa: f64,
    pub mjd_obs: f64,
    /// ISO-8601 UTC timestamp
    pub date_obs: String,
    pub gain: f64,
    pub bunit: String,
}

/// Write `pixels` (row = detector y) with `header` to a new FITS file at `path`.
pub fn write_image(path: &Path, pixels: &Array2<f32>, header: &ImageHeader) -> Result<()> {
    let (rows, cols) = pixels.dim();
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[rows, cols],
    };

    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let hdu = fptr.create_image(IMAGE_EXTNAME.to_string(), &description)?;
    let flat: Vec<f32> = pixels.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat)?;

    hdu.write_key(&mut fptr, "FILTER", header.filter.as_str())?;
    hdu.write_key(&mut fptr, "DITHER", header.dither)?;
    hdu.write_key(&mut fptr, "SCA", header.sca)?;
    hdu.write_key(&mut fptr, "RA_TARG", header.ra_targ)?;
    hdu.write_key(&mut fptr, "DEC_TARG", header.dec_targ)?;
    hdu.write_key(&mut fptr, "PA_FPA", header.pa_fpa)?;
    hdu.write_key(&mut fptr, "MJD-OBS", header.mjd_obs)?;
    hdu.write_key(&mut fptr, "DATE-OBS", header.date_obs.as_str())?;
    hdu.write_key(&mut fptr, "GAIN", header.gain)?;
    hdu.write_key(&mut fptr, "BUNIT", header.bunit.as_str())?;
    Ok(())
}

/// Read back an image written by [`write_image`] (plain or gzip-compressed).
pub fn read_image(path: &Path) -> Result<(Array2<f32>, ImageHeader)> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.hdu(IMAGE_EXTNAME)?;
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => (shape[0], shape[1]),
        _ => {
            return Err(SimError::config(format!(
                "{} has no 2D {IMAGE_EXTNAME} image",
                path.display()
            )))
        }
    };
    let data: Vec<f32> = hdu.read_image(&mut fptr)?;
    let pixels = Array2::from_shape_vec(shape, data)
        .map_err(|e| SimError::config(format!("cannot reshape {}: {e}", path.display())))?;

    let header = ImageHeader {
        filter: hdu.read_key(&mut fptr, "FILTER")?,
        dither: hdu.read_key(&mut fptr, "DITHER")?,
        sca: hdu.read_key(&mut fptr, "SCA")?,
        ra_targ: hdu.read_key(&mut fptr, "RA_TARG")?,
        dec_targ: hdu.read_key(&mut fptr, "DEC_TARG")?,
        pa_fpa: hdu.read_key(&mut fptr, "PA_FPA")?,
        mjd_obs: hdu.read_key(&mut fptr, "MJD-OBS")?,
        date_obs: hdu.read_key(&mut fptr, "DATE-OBS")?,
        gain: hdu.read_key(&mut fptr, "GAIN")?,
        bunit: hdu.read_key(&mut fptr, "BUNIT")?,
    };
    Ok((pixels, header))
}

const FLOAT_COLUMNS: [&str; 5] = ["x", "y", "ra", "dec", "mag"];

/// Name of the last integer column: stamp size, or host id for transients
fn tail_column(class: ObjectClass) -> &'static str {
    if class.has_host() {
        "hostid"
    } else {
        "stamp"
    }
}

/// Write a truth table. Rows carrying the unrealized sentinel are dropped.
///
/// An empty table is still written with its full schema.
pub fn write_truth(path: &Path, class: ObjectClass, rows: &[IndexRow]) -> Result<usize> {
    let rows: Vec<&IndexRow> = rows.iter().filter(|r| r.is_realized()).collect();
    let tail = tail_column(class);

    let mut columns = Vec::with_capacity(9);
    for name in ["ind", "sca", "dither"] {
        columns.push(ColumnDescription::new(name).with_type(ColumnDataType::Long).create()?);
    }
    for name in FLOAT_COLUMNS {
        columns.push(ColumnDescription::new(name).with_type(ColumnDataType::Double).create()?);
    }
    columns.push(ColumnDescription::new(tail).with_type(ColumnDataType::Long).create()?);

    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let hdu = fptr.create_table(TRUTH_EXTNAME.to_string(), &columns)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let ints = |f: fn(&IndexRow) -> i64| rows.iter().map(|r| f(r)).collect::<Vec<i64>>();
    let floats = |f: fn(&IndexRow) -> f64| rows.iter().map(|r| f(r)).collect::<Vec<f64>>();

    hdu.write_col(&mut fptr, "ind", &ints(|r| r.ind))?;
    hdu.write_col(&mut fptr, "sca", &ints(|r| r.sca))?;
    hdu.write_col(&mut fptr, "dither", &ints(|r| r.dither))?;
    hdu.write_col(&mut fptr, "x", &floats(|r| r.x))?;
    hdu.write_col(&mut fptr, "y", &floats(|r| r.y))?;
    hdu.write_col(&mut fptr, "ra", &floats(|r| r.ra))?;
    hdu.write_col(&mut fptr, "dec", &floats(|r| r.dec))?;
    hdu.write_col(&mut fptr, "mag", &floats(|r| r.mag))?;
    if class.has_host() {
        hdu.write_col(&mut fptr, tail, &ints(|r| r.hostid))?;
    } else {
        hdu.write_col(&mut fptr, tail, &ints(|r| r.stamp))?;
    }
    Ok(rows.len())
}

/// Read a truth table written by [`write_truth`].
pub fn read_truth(path: &Path, class: ObjectClass) -> Result<Vec<IndexRow>> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.hdu(TRUTH_EXTNAME)?;
    let n_rows = match &hdu.info {
        HduInfo::TableInfo { num_rows, .. } => *num_rows,
        _ => {
            return Err(SimError::config(format!(
                "{} has no {TRUTH_EXTNAME} table",
                path.display()
            )))
        }
    };
    if n_rows == 0 {
        return Ok(Vec::new());
    }

    let ind: Vec<i64> = hdu.read_col(&mut fptr, "ind")?;
    let sca: Vec<i64> = hdu.read_col(&mut fptr, "sca")?;
    let dither: Vec<i64> = hdu.read_col(&mut fptr, "dither")?;
    let x: Vec<f64> = hdu.read_col(&mut fptr, "x")?;
    let y: Vec<f64> = hdu.read_col(&mut fptr, "y")?;
    let ra: Vec<f64> = hdu.read_col(&mut fptr, "ra")?;
    let dec: Vec<f64> = hdu.read_col(&mut fptr, "dec")?;
    let mag: Vec<f64> = hdu.read_col(&mut fptr, "mag")?;
    let tail: Vec<i64> = hdu.read_col(&mut fptr, tail_column(class))?;

    Ok((0..n_rows)
        .map(|i| IndexRow {
            ind: ind[i],
            sca: sca[i],
            dither: dither[i],
            x: x[i],
            y: y[i],
            ra: ra[i],
            dec: dec[i],
            mag: mag[i],
            stamp: if class.has_host() { 0 } else { tail[i] },
            hostid: if class.has_host() { tail[i] } else { -1 },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row(ind: i64) -> IndexRow {
        IndexRow {
            ind,
            sca: 3,
            dither: 5,
            x: 100.5,
            y: 2000.25,
            ra: 0.17,
            dec: 0.35,
            mag: 21.0 + ind as f64 * 0.1,
            stamp: 13,
            hostid: 42,
        }
    }

    #[test]
    fn test_truth_drops_sentinel_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truth.fits");
        let rows = vec![row(1), IndexRow::unrealized(), row(4)];

        assert_eq!(write_truth(&path, ObjectClass::Galaxy, &rows).unwrap(), 2);
        let back = read_truth(&path, ObjectClass::Galaxy).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].ind, 1);
        assert_eq!(back[1].ind, 4);
        assert_eq!(back[1].stamp, 13);
        assert_relative_eq!(back[1].mag, 21.4);
    }

    #[test]
    fn test_truth_columns_hold_wide_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truth_wide.fits");
        let wide = i64::from(i32::MAX) + 7;
        write_truth(&path, ObjectClass::Star, &[row(wide)]).unwrap();
        let back = read_truth(&path, ObjectClass::Star).unwrap();
        assert_eq!(back[0].ind, wide);
        assert_eq!((back[0].sca, back[0].dither), (3, 5));
    }

    #[test]
    fn test_transient_table_has_host_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truth_sn.fits");
        write_truth(&path, ObjectClass::Transient, &[row(9)]).unwrap();
        let back = read_truth(&path, ObjectClass::Transient).unwrap();
        assert_eq!(back[0].hostid, 42);
        assert!(read_truth(&path, ObjectClass::Galaxy).is_err());
    }

    #[test]
    fn test_empty_truth_is_schema_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fits");
        assert_eq!(write_truth(&path, ObjectClass::Star, &[]).unwrap(), 0);
        assert!(read_truth(&path, ObjectClass::Star).unwrap().is_empty());
    }

    #[test]
    fn test_image_header_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.fits");
        let mut pixels = Array2::<f32>::zeros((4, 6));
        pixels[[1, 5]] = 2.5;
        let header = ImageHeader {
            filter: "J129".into(),
            dither: 5,
            sca: 3,
            ra_targ: 10.0,
            dec_targ: 20.0,
            pa_fpa: 0.0,
            mjd_obs: 59000.0,
            date_obs: "2020-05-31T00:00:00+00:00".into(),
            gain: 1.0,
            bunit: "electrons".into(),
        };
        write_image(&path, &pixels, &header).unwrap();

        let (back, back_header) = read_image(&path).unwrap();
        assert_eq!(back, pixels);
        assert_eq!(back_header, header);
    }
}
