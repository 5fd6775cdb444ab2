//! Output artifacts: FITS images and truth tables, plus the naming and
//! storage policy that places them on disk.

pub mod fits;
pub mod output;

pub use fits::{read_image, read_truth, write_image, write_truth, ImageHeader};
pub use output::OutputWriter;
