pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{CellClassifier, ModelConfig, NUM_CLASSES, image_to_chw, load_image_data};
pub use training::{PatchDataset, PatchBatcher, TrainingRequest, TrainingSummary, train_model, validate_dataset};
pub use inference::InferenceEngine;
