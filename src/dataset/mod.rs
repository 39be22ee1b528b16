pub mod dataset_writer;
pub mod patch_extractor;
pub mod preprocess;
pub mod split_assigner;

pub use dataset_writer::{patch_file_name, DatasetWriter};
pub use patch_extractor::{BoxPlacement, Patch, PatchExtractor};
pub use preprocess::{run_preprocess, DocumentRecord, PreprocessReport, Preprocessor};
pub use split_assigner::{rng_from_seed, SplitAssigner, SplitAssignment};
