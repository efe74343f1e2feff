//! # Utilities
//!
//! Helpers shared by the leaf reconcilers and the certificate controller.
//!
//! - `dockerconfig.rs` - Docker config JSON parsing and building
//! - `semver.rs` - `major.minor.release` extraction and ordering
//! - `labels.rs` - Label merging and sanitizing
//! - `hash.rs` - FNV-1 32-bit fingerprints
//! - `owner.rs` - Owner references to the DynaKube
//! - `kube_errors.rs` - Kubernetes API error classification
//! - `secrets.rs` - Reads of referenced secrets and config maps
//! - `clock.rs` - Injectable time source

pub mod clock;
pub mod dockerconfig;
pub mod hash;
pub mod kube_errors;
pub mod labels;
pub mod owner;
pub mod secrets;
pub mod semver;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use dockerconfig::{DockerAuth, DockerConfig, DockerConfigError};
pub use hash::{fnv1_32, fnv1_32_hex};
pub use kube_errors::{classify_kube_error, is_conflict, is_not_found, status_code};
pub use labels::{activegate_labels, merge_labels, sanitize_label};
pub use owner::controller_owner_ref;
pub use secrets::{ensure_secret, read_config_map_key, read_secret_key, secret_value};
pub use semver::{Semver, SemverError, compare_semver, extract_semver};
