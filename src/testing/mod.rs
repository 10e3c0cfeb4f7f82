//! Test doubles and assertions for exercising the engine without real
//! automation behind it.
//!
//! # Example
//!
//! ```rust,ignore
//! use flywheel::testing::MockHandler;
//!
//! let handler = MockHandler::confident(0.9)
//!     .with_result(serde_json::json!({"permit": "A-1"}));
//!
//! let registry = HandlerRegistry::builder()
//!     .register(TaskType::PermitSubmit, Arc::new(handler))
//!     .fill_placeholders()
//!     .build()?;
//! ```

pub mod assertions;
pub mod mocks;

pub use assertions::*;
pub use mocks::*;
