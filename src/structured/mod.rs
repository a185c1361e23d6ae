//! Structured output module.
//!
//! - [`infer`]: schema inference from an example value plus [`Descriptions`]
//! - [`OutputValidator`]: JSON Schema validation of the parsed reply
//! - [`StructuredPlan`]: provider `response_format`, prompt instruction and
//!   root-array wrapping for one `json()` call
//!
//! # Examples
//!
//! ```
//! use ai_lib_relay::structured::{infer_schema, OutputValidator};
//! use serde_json::json;
//!
//! let schema = infer_schema(&json!({"name": "", "born": "1815-12-10"}), None);
//! assert_eq!(schema["properties"]["born"]["format"], "date");
//!
//! let validator = OutputValidator::new(schema).unwrap();
//! assert!(validator.validate(&json!({"name": "Ada", "born": "1815-12-10"})).is_ok());
//! ```

pub mod descriptor;
pub mod infer;
pub mod json_mode;
pub mod validator;

pub use descriptor::{Description, Descriptions, FieldDescriptor};
pub use infer::infer_schema;
pub use json_mode::{extract_json, json_schema_from_type, JsonOptions, StructuredPlan, ROOT_ARRAY_KEY};
pub use validator::OutputValidator;
