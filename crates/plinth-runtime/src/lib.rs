//! # plinth-runtime
//!
//! Everything between a caller's request and a finished privileged program:
//!
//! - [`Registry`]: immutable catalog of permitted actions, loaded from
//!   manifests in the actions directory
//! - [`codec`]: framed, checksummed wire format for requests and responses
//! - [`ProcessInvoker`]: launches action programs through the escalation
//!   helper with a scrubbed environment and a hard timeout
//! - [`ActionBroker`]: validates, dispatches and audits each submission
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use plinth_core::PlinthConfig;
//! use plinth_runtime::ActionBroker;
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlinthConfig::from_file("/etc/plinth/plinth.yaml")?;
//! let broker = ActionBroker::from_config(&config)?;
//!
//! let mut arguments = BTreeMap::new();
//! arguments.insert("kite_name".to_string(), "mybox.pagekite.me".into());
//! let result = broker.submit("pagekite-set-kite", arguments).await?;
//! println!("exit status {}", result.exit_status);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod codec;
pub mod error;
pub mod invoker;
pub mod locks;
pub mod registry;

pub use broker::ActionBroker;
pub use codec::CodecError;
pub use error::{BrokerError, StartupError};
pub use invoker::{Invocation, InvocationOutput, Invoker, LaunchError, ProcessInvoker};
pub use registry::{Registry, RegistryError, SkippedEntry};
