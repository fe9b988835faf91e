//! avi-agent - natural-language operations for the Avi Load Balancer
//!
//! A language model drives controller operations through structured tool
//! calls. The crate can be used as a library with any [`ModelClient`] and
//! [`Controller`] implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use avi_agent::{AviClient, Config, RuntimeConfig, SessionManager, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!
//!     let controller = Arc::new(AviClient::new(&config.controller)?);
//!     controller.login().await?;
//!
//!     let manager = SessionManager::new(
//!         Arc::new(ToolRegistry::new()),
//!         controller.clone(),
//!         avi_agent::llm::from_config(&config)?,
//!         RuntimeConfig::from_config(&config),
//!     );
//!
//!     match manager.submit("ops", "list all virtual services").await {
//!         Ok(answer) => println!("{}", answer),
//!         Err(e) => eprintln!("Failed: {}", e),
//!     }
//!
//!     controller.logout().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod tools;

// Re-export the public API
pub use config::{Config, RuntimeConfig};
pub use controller::{AviClient, Controller, ControllerRequest};
pub use error::{
    ControllerError, ModelProtocolError, SessionError, SessionErrorKind, ToolErrorKind,
    ValidationError,
};
pub use llm::{Message, ModelClient, ModelResponse, Role, ToolCall, ToolResult};
pub use orchestrator::{Orchestrator, RetryPolicy, SessionManager, SessionState, TurnEvent};
pub use tools::{ToolDefinition, ToolRegistry};
