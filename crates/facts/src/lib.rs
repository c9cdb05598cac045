//! Flat snapshots of a cluster's observable configuration.
//!
//! A [`FactModel`] maps dotted keys (`storage.default`, `apis.preferred`, ...)
//! to single-line string values. Set-valued facts are encoded with
//! [`FactSet`]. Snapshots are exchanged as `key=value` text files (see
//! [`codec`]) and compared with [`differ::diff`].

pub mod codec;
pub mod differ;
pub mod keys;
pub mod model;
pub mod quantity;
pub mod set;

pub use codec::{parse, to_text, FactWriter};
pub use differ::{diff, Assessment, DiffOptions, DiffReport, DiffRow};
pub use model::{FactError, FactModel, FactSink};
pub use set::FactSet;
