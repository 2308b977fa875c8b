//! Location tracking: session state machine, sample acquisition and
//! dual-channel dispatch.

pub mod coordinator;
pub mod dispatch;
pub mod platform;
pub mod sample_source;
mod types;

pub use coordinator::{Collaborators, CoordinatorOptions, TrackingCoordinator, BACKGROUND_TASK_NAME};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use platform::{
    BackgroundOptions, BackgroundTasks, LocationProvider, PermissionGate, PermissionStatus,
    ReplayProvider, StaticPermissions, TimerBackgroundTasks, Unsupported, Waypoint,
};
pub use sample_source::{SampleFeed, SampleHandle, SampleSource};
pub use types::{LocationSample, TrackingMode, TrackingSession};
