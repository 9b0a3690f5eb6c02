//! Cross-source merging of logical facts

pub mod field_merger;

pub use field_merger::FieldMerger;
