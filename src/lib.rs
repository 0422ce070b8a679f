//! Loom — an orchestration control plane for long-running, human-supervised
//! migrations: structural changes applied one candidate at a time across a
//! fleet of services, repositories, topics, or similar subjects.
//!
//! The crate is organized by the component boundaries of the design: a
//! persistent [`store`], a durable [`engine`] port with an in-process
//! implementation, the pure [`orchestrator`] step-decision logic the engine
//! drives, the outbound [`notifier`] to migrators, the [`service`] layer
//! gluing them together, read-only [`metrics`] projections, and the
//! [`http_server`] inbound API.

pub mod cli;
pub mod config;
pub mod config_validator;
pub mod domain;
pub mod engine;
pub mod http_server;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod service;
pub mod store;
