//! Controller RPC service (spec §2, §4.2): create/delete/list volumes,
//! report capacity, validate capabilities against a volume.

use std::sync::Arc;

use serde_json::json;
use tonic::{Request, Response, Status};

use crate::arbiter::Arbiter;
use crate::config::Config;
use crate::csi::controller_server::Controller as ControllerTrait;
use crate::csi::{
    controller_service_capability, validate_volume_capabilities_response, ControllerGetCapabilitiesRequest,
    ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerServiceCapability, ControllerUnpublishVolumeRequest, ControllerUnpublishVolumeResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest,
    GetCapacityResponse, ListVolumesRequest, ListVolumesResponse, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse,
};
use crate::server::ProbeGate;
use crate::validator::Validator;
use crate::volume::{CapacityRange, VolumeService};

use super::{canonical_json, convert_capabilities, lv_to_proto, mount_fs_sorted};

pub struct Controller {
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
impl ControllerTrait for Controller {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        self.validator.reject_if_remove_mode()?;
        self.gate.ensure_ready()?;
        let msg = request.into_inner();
        Validator::require_non_empty("name", &msg.name)?;

        let caps = convert_capabilities(&msg.volume_capabilities)?;
        self.validator.validate_capabilities(&caps, false)?;

        let capacity = msg.capacity_range.as_ref().map(|r| CapacityRange {
            required_bytes: r.required_bytes.max(0) as u64,
            limit_bytes: r.limit_bytes.max(0) as u64,
        });

        let nonce = canonical_json(json!({
            "name": msg.name,
            "mount_fs_sorted": mount_fs_sorted(&msg.volume_capabilities),
            "parameters": msg.parameters,
            "required_bytes": capacity.map(|c| c.required_bytes).unwrap_or(0),
            "limit_bytes": capacity.map(|c| c.limit_bytes).unwrap_or(0),
        }));

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let name = msg.name.clone();
        let lv = self
            .arbiter
            .call_mutating(format!("new/{}", msg.name), Some(nonce), cancel, move || async move {
                volume_service.create_volume(&name, capacity).await
            })
            .await?;

        Ok(Response::new(CreateVolumeResponse {
            volume: Some(lv_to_proto(&lv)),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        self.validator.reject_if_remove_mode()?;
        self.gate.ensure_ready()?;
        let msg = request.into_inner();
        Validator::require_non_empty("volume_id", &msg.volume_id)?;

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let volume_id = msg.volume_id.clone();
        self.arbiter
            .call_mutating(format!("del/{}", msg.volume_id), None, cancel, move || async move {
                volume_service.delete_volume(&volume_id).await
            })
            .await?;

        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented("Method not implemented"))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented("Method not implemented"))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        self.gate.ensure_ready()?;
        let msg = request.into_inner();
        Validator::require_non_empty("volume_id", &msg.volume_id)?;

        let caps = convert_capabilities(&msg.volume_capabilities)?;
        self.validator.validate_capabilities(&caps, false)?;

        let nonce = canonical_json(json!({
            "volume_id": msg.volume_id,
            "mount_fs_sorted": mount_fs_sorted(&msg.volume_capabilities),
        }));

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let volume_id = msg.volume_id.clone();
        self.arbiter
            .call_readonly(format!("validate/{}", msg.volume_id), Some(nonce), cancel, move || async move {
                volume_service.get_volume(&volume_id).await
            })
            .await?;

        Ok(Response::new(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(validate_volume_capabilities_response::Confirmed {
                parameters: msg.parameters,
                volume_capabilities: msg.volume_capabilities,
            }),
            message: String::new(),
        }))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        self.gate.ensure_ready()?;
        let msg = request.into_inner();

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let volumes = self
            .arbiter
            .call_readonly(format!("list/{}", msg.starting_token), None, cancel, move || async move {
                volume_service.list_volumes().await
            })
            .await?;

        Ok(Response::new(ListVolumesResponse {
            entries: volumes
                .iter()
                .map(|lv| crate::csi::list_volumes_response::Entry {
                    volume: Some(lv_to_proto(lv)),
                })
                .collect(),
            next_token: String::new(),
        }))
    }

    async fn get_capacity(
        &self,
        request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        if !self.config.remove_mode {
            self.gate.ensure_ready()?;
        }
        let msg = request.into_inner();
        let caps = convert_capabilities(&msg.volume_capabilities)?;
        for cap in &caps {
            self.validator.validate_capability(cap, true)?;
        }
        let capability = caps.first().cloned();

        let nonce_key = canonical_json(json!({
            "mount_fs_sorted": mount_fs_sorted(&msg.volume_capabilities),
            "parameters": msg.parameters,
        }));

        let (cancel, _guard) = cancellation();
        let volume_service = self.volume_service.clone();
        let available = self
            .arbiter
            .call_readonly(format!("cap/{}", nonce_key), None, cancel, move || async move {
                volume_service.get_capacity(capability.as_ref()).await
            })
            .await?;

        Ok(Response::new(GetCapacityResponse {
            available_capacity: available as i64,
        }))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        use controller_service_capability::{rpc::Type as RpcType, Rpc, Type};
        let types = [RpcType::CreateDeleteVolume, RpcType::ListVolumes, RpcType::GetCapacity];
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: types
                .into_iter()
                .map(|t| ControllerServiceCapability {
                    r#type: Some(Type::Rpc(Rpc { r#type: t as i32 })),
                })
                .collect(),
        }))
    }
}
