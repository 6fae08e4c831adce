pub mod compose;
pub mod error;
pub mod health;
pub mod images;
pub mod local_runtime;
pub mod provision;
pub mod runtime;
pub mod supervise;

pub use compose::{ComposeSpec, COMPOSE_FILE_NAME, ENV_FILE_NAME};
pub use error::{DeployError, Result};
pub use health::{HealthMonitor, HealthState};
pub use images::ImageStore;
pub use local_runtime::LocalProcessRuntime;
pub use provision::{
    HostSpec, LogProgressReporter, PlanReport, ProgressReporter, ProvisionContext, ProvisionPlan,
    StepStatus,
};
pub use runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState};
pub use supervise::{CycleAction, Supervisor, SupervisorConfig};
