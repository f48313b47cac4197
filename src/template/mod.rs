//! # Templates
//!
//! Field discovery, field value types and the substitution engine that
//! writes values back into a `.docx` template.

pub mod analyzer;
pub mod catalog;
pub mod fields;
pub mod substitution;

pub use analyzer::{extract_placeholders, full_text};
pub use catalog::{TemplateKind, CUSTOM_DOWNLOAD_NAME};
pub use fields::{clean_field_values, flatten_object, normalize_value, FieldSpec, FieldSpecs, FieldValues};
pub use substitution::fill;
