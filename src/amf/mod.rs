//! AMF value model
//!
//! Command arguments, status objects and shared-object attributes are
//! carried as [`AmfValue`]s. The byte-level AMF0/AMF3 codecs live in the
//! wire layer; this crate only routes values.

mod value;

pub use value::AmfValue;
