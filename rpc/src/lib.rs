//! Generated CSI protobuf/gRPC bindings.
//!
//! The message and service definitions come from `proto/csi.proto`; this
//! crate exists only to give `tonic-build`'s output a stable home so the
//! rest of the workspace can depend on `csi_lvm_rpc::csi` without caring
//! how the bindings were produced.

pub mod csi {
    tonic::include_proto!("csi.v1");
}
