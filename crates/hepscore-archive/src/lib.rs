//! Workload image archives.
//!
//! Resolves the images a HEPscore configuration would run, pulls them as
//! SIF files and packs them into one tarball keyed by architecture and the
//! digest of the image list. A remote manifest lets an unchanged archive be
//! skipped.

pub mod archiver;
pub mod error;
pub mod images;
pub mod manifest;

pub use archiver::{ArchiveStatus, ImageArchiver, SIF_DIR};
pub use error::{ArchiveError, Result};
pub use images::ImageSet;
pub use manifest::ManifestClient;
