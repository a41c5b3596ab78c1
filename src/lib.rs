pub mod config;
pub mod error;
pub mod host;
pub mod interval;
pub mod kind;
pub mod parser;
pub mod registry;
pub mod script;
pub mod value;
pub mod wait;

// Re-export main types
pub use config::RuntimeConfig;
pub use error::ScriptError;
pub use host::{Host, NullHost, Service};
pub use script::{ExecuteOptions, Script, ScriptHandle, ScriptOutcome};
pub use value::Value;
