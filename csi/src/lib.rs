//! `csi-lvm`: a node-local CSI storage plugin backed by a single LVM
//! volume group (spec.md §1-§2).
//!
//! This crate is organized leaves-first: `lvm` and `mount` are the
//! external-collaborator interfaces (§6), `capacity`/`validator` are
//! pure/stateless helpers, `probe`/`volume` are the core business logic
//! (§4.1-§4.4), `arbiter` is the admission/serialization layer (§4.6),
//! and `service`/`server` wire all of the above behind the three CSI
//! gRPC services.

pub mod arbiter;
pub mod capacity;
pub mod config;
pub mod error;
pub mod lvm;
pub mod metrics;
pub mod modules;
pub mod mount;
pub mod probe;
pub mod server;
pub mod service;
pub mod validator;
pub mod volume;

pub use csi_lvm_rpc::csi;
