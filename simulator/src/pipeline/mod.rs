//! Per-pointing simulation: catalogs, rendering, stamp streams, worker
//! collectives and the accumulation pipeline that ties them together.

pub mod accumulate;
pub mod catalog;
pub mod comm;
pub mod render;
pub mod stream;

pub use accumulate::{
    candidates, AccumulationPipeline, DetectorImage, IndexRow, IndexTable, PipelineOptions,
    PointingOutcome, UNREALIZED,
};
pub use catalog::{CatalogObject, CatalogProvider, InMemoryCatalog, ObjectClass, ObjectTable};
pub use comm::{thread_group, Communicator, SoloComm, ThreadComm, ROOT};
pub use render::{PsfStampRenderer, RenderStep, Renderer, Stamp, StampRecord};
pub use stream::{read_stamps, StampStream};
