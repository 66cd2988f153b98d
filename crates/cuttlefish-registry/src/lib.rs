//! cuttlefish-registry: register catalogs and payload codecs for Cuttlefish Harp devices

mod error;
pub use error::{RegistryError, Result};

mod types;
pub use types::{EnableFlag, TaskIndex, TaskState, Timestamped, Toggle};

mod payload;
pub use payload::PayloadCodec;

mod value;
pub use value::{RegisterValue, TypedPayload};

mod registers;
pub use registers::Register;

mod catalog;
pub use catalog::{Access, Catalog, DeviceModel, RegisterDescriptor, RegisterShape};

pub mod cuttlefish;
pub mod fip;

mod decode;
pub use decode::{decode_message, RegisterRecord};

mod device;
pub use device::Device;

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};

pub mod plan;
pub use plan::{apply_plan, load_task_plan, ApplyReport, PlanError, TaskPlan};

#[cfg(feature = "mock")]
mod emulator;
#[cfg(feature = "mock")]
pub use emulator::emulated_link;
