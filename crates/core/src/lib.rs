//! murmur-core – Fehlertypen und Versionsinformationen
//!
//! Fundamentale Bausteine, die von `murmur-protocol` gemeinsam genutzt
//! werden: ein zentraler Fehler-Enum und die Crate-Versionsnummer.

pub mod error;
pub mod version;

pub use error::{MurmurError, Result};
pub use version::{VERSION, VERSION_PACKED};
