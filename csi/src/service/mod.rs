//! RPC service facades (spec §2, component 7: "server facade"). Each
//! submodule implements one of the three CSI gRPC services generated
//! into `csi_lvm_rpc::csi`, translating proto messages to/from the
//! plain types `validator`/`volume` work with and delegating the actual
//! work through the shared `Arbiter`.

pub mod controller;
pub mod identity;
pub mod node;

use crate::csi;
use crate::error::CoreError;
use crate::validator::{AccessMode, AccessType, Capability};

/// Converts a wire `VolumeCapability` into the plain `Capability` the
/// validator/volume service operate on (spec §4.2.3, §4.5).
pub(crate) fn convert_capability(cap: &csi::VolumeCapability) -> Result<Capability, CoreError> {
    use csi::volume_capability::{access_mode::Mode, AccessType as ProtoAccessType};

    let access_type = match &cap.access_type {
        Some(ProtoAccessType::Block(_)) => AccessType::Block,
        Some(ProtoAccessType::Mount(m)) => AccessType::Mount {
            fs_type: m.fs_type.clone(),
        },
        None => {
            return Err(CoreError::invalid_argument(
                "missing required field: volume_capability.access_type",
            ))
        }
    };

    let access_mode = match cap.access_mode.as_ref().map(|m| Mode::from_i32(m.mode)).flatten() {
        Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
        Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
        Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
        Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
        Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
        Some(Mode::Unknown) | None => AccessMode::Unknown,
    };

    Ok(Capability {
        access_type,
        access_mode,
    })
}

pub(crate) fn convert_capabilities(caps: &[csi::VolumeCapability]) -> Result<Vec<Capability>, CoreError> {
    caps.iter().map(convert_capability).collect()
}

/// The sorted list of requested mount filesystem types, used as part of
/// several RPCs' single-flight nonce (spec §4.6 table).
pub(crate) fn mount_fs_sorted(caps: &[csi::VolumeCapability]) -> Vec<String> {
    use csi::volume_capability::AccessType as ProtoAccessType;

    let mut types: Vec<String> = caps
        .iter()
        .filter_map(|c| match &c.access_type {
            Some(ProtoAccessType::Mount(m)) => Some(m.fs_type.clone()),
            _ => None,
        })
        .collect();
    types.sort();
    types
}

/// Canonical JSON encoding of a nonce/key payload (spec §4.6): object
/// keys are sorted because `serde_json::Map` is backed by a `BTreeMap`
/// without the `preserve_order` feature enabled.
pub(crate) fn canonical_json(value: serde_json::Value) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}

pub(crate) fn lv_to_proto(lv: &crate::lvm::LogicalVolume) -> csi::Volume {
    csi::Volume {
        capacity_bytes: lv.capacity_bytes as i64,
        volume_id: lv.name.clone(),
        volume_context: Default::default(),
    }
}
