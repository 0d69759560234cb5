pub mod crypto;
pub mod recovery;
pub mod service;

pub use service::{provisioning, start_enrollment, verify_code, TotpEnrollment};
