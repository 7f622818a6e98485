//! HN4: a crash-consistent block-storage engine.
//!
//! The crate turns a raw block device into a self-describing volume
//! carrying generational, content-addressed payload records (anchors)
//! and ordered payload streams (tensors). The heart of it is the volume
//! lifecycle: superblock quorum across the four cardinal replicas,
//! geometry and feature validation, epoch drift classification, state
//! evaluation, resource loading, root verification with Genesis repair,
//! zero-scan reconstruction after a crash, and the dirty-mark/broadcast
//! discipline that makes every mount/unmount cycle a transaction.

pub mod bitmap;
pub mod checksum;
pub mod error;
pub mod flags;
pub mod format;
pub mod hal;
pub mod logger;
pub mod ondisk;
pub mod profile;
pub mod quality;
pub mod recon;
pub mod resources;
pub mod ring;
pub mod root;
pub mod state;
pub mod tensor;
pub mod util;
pub mod validate;
pub mod volume;
pub mod vote;

pub use error::{strerror, Error};
pub use format::{format, FormatParams};
pub use hal::{Device, DeviceCaps, FileDevice, RamDevice};
pub use profile::Profile;
pub use tensor::{tensor_close, tensor_open, tensor_read, TensorStream};
pub use volume::{mount, unmount, MountParams, Volume, READ_ALLOW_ENCRYPTED};
