//! Label alignment and the training stage: confirmed leaks become per-token
//! tag sequences and feed an incremental fine-tune of the entity model.

pub mod align;
pub mod stage;
pub mod tokenizer;
pub mod tuner;

pub use align::{align, Tag, TaggedSequence};
pub use stage::{run_training, TrainingOutcome};
pub use tokenizer::{tokenize, Token};
pub use tuner::{HttpTuner, HttpTunerConfig, TrainSample, TuneReport, Tuner, TunerError};
