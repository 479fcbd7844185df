//! Shared types for the Plinth privileged action broker.
//!
//! This crate holds the action data model used across the workspace and the
//! YAML configuration that drives the broker.

pub mod action;
pub mod config;

pub use action::{
    ActionRequest, ActionResult, ActionSpec, ArgumentPattern, ArgumentSpec, ArgumentType,
    ResponseFormat,
};
pub use config::{
    ActionManifest, AuditConfig, BrokerConfig, ConfigError, EscalationConfig, EscalationMethod,
    PlinthConfig, DEFAULT_CONFIG_PATH,
};
