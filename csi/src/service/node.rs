//! Node RPC service (spec §2, §4.2): publish/unpublish a volume onto the
//! node's filesystem, report node identity.

use std::sync::Arc;

use serde_json::json;
use tonic::{Request, Response, Status};

use crate::arbiter::Arbiter;
use crate::config::Config;
use crate::csi::node_server::Node as NodeTrait;
use crate::csi::{
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest, NodeGetInfoResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse,
};
use crate::server::ProbeGate;
use crate::validator::Validator;
use crate::volume::VolumeService;

use super::{canonical_json, convert_capability};

pub struct Node {
    pub config: Arc<Config>,
    pub arbiter: Arc<Arbiter>,
    pub volume_service: Arc<VolumeService>,
    pub validator: Arc<Validator>,
    pub gate: Arc<ProbeGate>,
}

fn cancellation() -> (
    tokio_util::sync::CancellationToken,
    tokio_util::sync::DropGuard,
) {
    let token = tokio_util::sync::CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

#[tonic::async_trait]
impl NodeTrait for Node {
    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        self.validator.reject_if_remove_mode()?;
        self.gate.ensure_ready()?;
        let msg = request.into_inner();
        Validator::require_non_empty("volume_id", &msg.volume_id)?;
        Validator::require_non_empty("target_path", &msg.target_path)?;

        let proto_cap = msg
            .volume_capability
            .clone()
            .ok_or_else(|| crate::error::CoreError::invalid_argument("missing required field: volume_capability"))?;
        let capability = convert_capability(&proto_cap)?;
        self.validator.validate_capability(&capability, false)?;

        let nonce = canonical_json(json!({
            "fs_type": match &capability.access_type {
                crate::validator::AccessType::Mount { fs_type } => fs_type.clone(),
                crate::validator::AccessType::Block => String::new(),
            },
            "readonly": msg.readonly,
        }));
        let key = format!(
            "pub/{}",
            canonical_json(json!({"volume_id": msg.volume_id, "target_path": msg.target_path}))
        );

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let volume_id = msg.volume_id.clone();
        let target_path = msg.target_path.clone();
        let readonly = msg.readonly;
        self.arbiter
            .call_mutating(key, Some(nonce), cancel, move || async move {
                volume_service
                    .node_publish_volume(&volume_id, &target_path, &capability, readonly)
                    .await
            })
            .await?;

        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        self.validator.reject_if_remove_mode()?;
        self.gate.ensure_ready()?;
        let msg = request.into_inner();
        Validator::require_non_empty("volume_id", &msg.volume_id)?;
        Validator::require_non_empty("target_path", &msg.target_path)?;

        let key = format!(
            "unpub/{}",
            canonical_json(json!({"volume_id": msg.volume_id, "target_path": msg.target_path}))
        );

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let volume_id = msg.volume_id.clone();
        let target_path = msg.target_path.clone();
        self.arbiter
            .call_mutating(key, None, cancel, move || async move {
                volume_service.node_unpublish_volume(&volume_id, &target_path).await
            })
            .await?;

        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities: vec![] }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: 0,
        }))
    }
}
