//! Source catalogs consumed by the pipeline.
//!
//! Catalogs are columnar: one [`ObjectTable`] per object class, with sky
//! positions in radians so the pointing frame can run its batch geometry
//! directly on the columns. Each row remembers its index in the full
//! catalog, which is what truth tables record.

use std::fmt;
use std::path::Path;

use ndarray::Array1;
use serde::Deserialize;

use crate::error::Result;
use crate::pointing::DateWindows;

/// The three object classes simulated for every pointing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Galaxy,
    Star,
    Transient,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 3] = [ObjectClass::Galaxy, ObjectClass::Star, ObjectClass::Transient];

    /// Plural name used in log messages
    pub fn plural(self) -> &'static str {
        match self {
            ObjectClass::Galaxy => "galaxies",
            ObjectClass::Star => "stars",
            ObjectClass::Transient => "supernovae",
        }
    }

    /// Suffix appended to per-worker stamp stream names
    pub fn stamp_suffix(self) -> &'static str {
        match self {
            ObjectClass::Galaxy => "",
            ObjectClass::Star => "_star",
            ObjectClass::Transient => "_supernova",
        }
    }

    /// Suffix appended to truth table names
    pub fn truth_suffix(self) -> &'static str {
        match self {
            ObjectClass::Galaxy => "",
            ObjectClass::Star => "_star",
            ObjectClass::Transient => "_sn",
        }
    }

    /// Transients carry a host id in place of the stamp size
    pub fn has_host(self) -> bool {
        self == ObjectClass::Transient
    }

    /// Only transients are restricted to their activity window
    pub fn is_time_windowed(self) -> bool {
        self == ObjectClass::Transient
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// One catalog entry, gathered from its table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogObject {
    /// Index in the full catalog
    pub index: usize,
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
    /// Intrinsic Gaussian size, arcsec (zero for point sources)
    pub size: f64,
    pub hostid: i64,
}

/// Columnar table of one object class.
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    pub index: Vec<usize>,
    pub ra: Array1<f64>,
    pub dec: Array1<f64>,
    pub mag: Array1<f64>,
    pub size: Array1<f64>,
    pub hostid: Vec<i64>,
    pub start_mjd: Array1<f64>,
    pub end_mjd: Array1<f64>,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    ra: f64,
    dec: f64,
    mag: f64,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default)]
    hostid: Option<i64>,
    #[serde(default)]
    start_mjd: Option<f64>,
    #[serde(default)]
    end_mjd: Option<f64>,
}

impl ObjectTable {
    pub fn from_objects(objects: Vec<CatalogObject>) -> Self {
        let windows = vec![(f64::NEG_INFINITY, f64::INFINITY); objects.len()];
        Self::from_parts(objects, windows)
    }

    fn from_parts(objects: Vec<CatalogObject>, windows: Vec<(f64, f64)>) -> Self {
        Self {
            index: objects.iter().map(|o| o.index).collect(),
            ra: objects.iter().map(|o| o.ra).collect(),
            dec: objects.iter().map(|o| o.dec).collect(),
            mag: objects.iter().map(|o| o.mag).collect(),
            size: objects.iter().map(|o| o.size).collect(),
            hostid: objects.iter().map(|o| o.hostid).collect(),
            start_mjd: windows.iter().map(|w| w.0).collect(),
            end_mjd: windows.iter().map(|w| w.1).collect(),
        }
    }

    /// Load a table from CSV with columns `ra,dec,mag` (radians, AB mag) and
    /// optional `size,hostid,start_mjd,end_mjd`.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let mut objects = Vec::new();
        let mut windows = Vec::new();
        for (index, row) in reader.deserialize::<CatalogRow>().enumerate() {
            let row = row?;
            objects.push(CatalogObject {
                index,
                ra: row.ra,
                dec: row.dec,
                mag: row.mag,
                size: row.size.unwrap_or(0.0),
                hostid: row.hostid.unwrap_or(-1),
            });
            windows.push((
                row.start_mjd.unwrap_or(f64::NEG_INFINITY),
                row.end_mjd.unwrap_or(f64::INFINITY),
            ));
        }
        log::debug!(
            "Loaded {} catalog objects from {}",
            objects.len(),
            path.as_ref().display()
        );
        Ok(Self::from_parts(objects, windows))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Row `row` of the table
    pub fn object(&self, row: usize) -> CatalogObject {
        CatalogObject {
            index: self.index[row],
            ra: self.ra[row],
            dec: self.dec[row],
            mag: self.mag[row],
            size: self.size[row],
            hostid: self.hostid[row],
        }
    }

    /// Activity windows of every row
    pub fn windows(&self) -> DateWindows<'_> {
        DateWindows {
            start_mjd: self.start_mjd.view(),
            end_mjd: self.end_mjd.view(),
        }
    }

    /// New table holding only `rows`, in the given order
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            index: rows.iter().map(|&r| self.index[r]).collect(),
            ra: rows.iter().map(|&r| self.ra[r]).collect(),
            dec: rows.iter().map(|&r| self.dec[r]).collect(),
            mag: rows.iter().map(|&r| self.mag[r]).collect(),
            size: rows.iter().map(|&r| self.size[r]).collect(),
            hostid: rows.iter().map(|&r| self.hostid[r]).collect(),
            start_mjd: rows.iter().map(|&r| self.start_mjd[r]).collect(),
            end_mjd: rows.iter().map(|&r| self.end_mjd[r]).collect(),
        }
    }
}

/// Read access to the per-class source tables.
pub trait CatalogProvider: Send + Sync {
    fn table(&self, class: ObjectClass) -> &ObjectTable;

    fn count(&self, class: ObjectClass) -> usize {
        self.table(class).len()
    }
}

/// Catalog held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub galaxies: ObjectTable,
    pub stars: ObjectTable,
    pub transients: ObjectTable,
}

impl InMemoryCatalog {
    pub fn new(galaxies: ObjectTable, stars: ObjectTable, transients: ObjectTable) -> Self {
        Self {
            galaxies,
            stars,
            transients,
        }
    }

    /// Load whichever class tables are given; missing classes are empty.
    pub fn from_csv(
        galaxies: Option<&Path>,
        stars: Option<&Path>,
        transients: Option<&Path>,
    ) -> Result<Self> {
        let load = |path: Option<&Path>| -> Result<ObjectTable> {
            path.map(ObjectTable::from_csv)
                .transpose()
                .map(Option::unwrap_or_default)
        };
        Ok(Self::new(load(galaxies)?, load(stars)?, load(transients)?))
    }

    /// Rows assigned to worker `rank` out of `size`: every `size`-th row
    /// starting at `rank`. Partitions are disjoint and cover the catalog.
    pub fn partition(&self, rank: usize, size: usize) -> Self {
        let part = |table: &ObjectTable| {
            let rows: Vec<usize> = (rank..table.len()).step_by(size.max(1)).collect();
            table.select(&rows)
        };
        Self::new(part(&self.galaxies), part(&self.stars), part(&self.transients))
    }
}

impl CatalogProvider for InMemoryCatalog {
    fn table(&self, class: ObjectClass) -> &ObjectTable {
        match class {
            ObjectClass::Galaxy => &self.galaxies,
            ObjectClass::Star => &self.stars,
            ObjectClass::Transient => &self.transients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(index: usize, ra: f64) -> CatalogObject {
        CatalogObject {
            index,
            ra,
            dec: 0.1,
            mag: 22.0,
            size: 0.3,
            hostid: -1,
        }
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let galaxies = ObjectTable::from_objects((0..10).map(|i| object(i, i as f64 * 0.01)).collect());
        let catalog = InMemoryCatalog::new(galaxies, ObjectTable::default(), ObjectTable::default());

        let mut seen: Vec<usize> = (0..3)
            .flat_map(|rank| catalog.partition(rank, 3).galaxies.index)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        let part = catalog.partition(1, 3);
        assert_eq!(part.galaxies.index, vec![1, 4, 7]);
        assert_eq!(part.galaxies.object(1), object(4, 0.04));
        assert_eq!(part.count(ObjectClass::Star), 0);
    }

    #[test]
    fn test_csv_with_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let gals = dir.path().join("gals.csv");
        std::fs::write(&gals, "ra,dec,mag,size\n0.1,0.2,21.5,0.4\n0.3,0.4,23.0,0.2\n").unwrap();
        let sne = dir.path().join("sne.csv");
        std::fs::write(
            &sne,
            "ra,dec,mag,hostid,start_mjd,end_mjd\n0.1,0.2,24.0,1,58990,59010\n",
        )
        .unwrap();

        let catalog = InMemoryCatalog::from_csv(Some(gals.as_path()), None, Some(sne.as_path())).unwrap();
        assert_eq!(catalog.count(ObjectClass::Galaxy), 2);
        assert_eq!(catalog.count(ObjectClass::Star), 0);
        assert_eq!(catalog.galaxies.object(1).size, 0.2);
        assert_eq!(catalog.galaxies.object(0).hostid, -1);

        let sn = catalog.table(ObjectClass::Transient);
        assert_eq!(sn.object(0).hostid, 1);
        assert_eq!(sn.windows().start_mjd[0], 58990.0);
        assert_eq!(catalog.galaxies.windows().end_mjd[0], f64::INFINITY);
    }

    #[test]
    fn test_class_names() {
        assert_eq!(ObjectClass::Transient.truth_suffix(), "_sn");
        assert_eq!(ObjectClass::Transient.stamp_suffix(), "_supernova");
        assert!(ObjectClass::Transient.has_host());
        assert!(!ObjectClass::Star.has_host());
        assert_eq!(ObjectClass::Galaxy.to_string(), "galaxies");
    }
}
