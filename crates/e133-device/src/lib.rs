//! E1.33 device service.
//!
//! Listens for E1.33 requests on UDP and on a single health-checked TCP
//! connection, routes each decoded RDM request to the endpoint it targets, and
//! sends the endpoint's response back over UDP.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use e133_device::{DeviceConfig, E133Device, LabelResponder};
//!
//! let config = DeviceConfig::default();
//! let device = E133Device::new(config.clone());
//! device.set_root_endpoint(Arc::new(LabelResponder::new(config.root_uid, "root")));
//! device
//!     .registry()
//!     .register(1, Arc::new(LabelResponder::new(config.root_uid, "one")))?;
//!
//! let running = device.start().await?;
//! // ...
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod device;
pub mod dispatcher;
pub mod endpoint;
pub mod health;
pub mod registry;
pub mod responder;
pub mod transport;

pub use config::{ConfigError, DeviceConfig, EndpointConfig};
pub use connection::{CloseReason, ConnectionEvent, ConnectionSlot, TcpConnectionStats};
pub use device::{DeviceError, E133Device, RunningDevice};
pub use dispatcher::{Completion, DispatchError, Dispatcher};
pub use endpoint::{Endpoint, EndpointHandle, RdmFailure, RdmReply, Responder, ResponseStatus};
pub use health::{DEFAULT_HEALTH_CHECK_INTERVAL, HealthCheck, HealthState};
pub use registry::{EndpointObserver, EndpointRegistry, RegistryError};
pub use responder::LabelResponder;
