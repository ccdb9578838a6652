pub mod artifact;
pub mod checkpoint;
pub mod context;
pub mod description;
pub mod error;
pub mod lockfile;
pub mod observability;
pub mod pipeline;
pub mod presets;
pub mod resolve;
pub mod runner;
pub mod session;
pub mod steps;
pub mod table;
pub mod validation;

pub use artifact::{Artifact, ArtifactDelta, ArtifactStore};
pub use context::{RunContext, RunStatus};
pub use description::{PipelineDescription, load_pipeline};
pub use error::{PipelineError, Result};
pub use pipeline::{Step, StepContract, StepRegistry, StepScope, StepSpec};
pub use runner::{PipelineRunner, RunResponse, RunnerStatus, StepOutcome, run_pipeline};
pub use session::SessionTable;
pub use table::Table;
