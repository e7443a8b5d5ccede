//! Core FHIR types shared by every other crate in the workspace:
//! the resource row shape (§3), the FHIR version/resource-type vocabulary,
//! timestamps, id generation, and the unified error taxonomy (§7).

pub mod error;
pub mod fhir;
pub mod id;
pub mod resource;
pub mod time;

pub use error::{CoreError, ErrorCategory, Result};
pub use fhir::{FhirVersion, Interaction, ResourceType};
pub use id::{IdError, generate_id, validate_id};
pub use resource::{ResourceMeta, ResourceRow};
pub use time::{FhirDateTime, now_utc};
