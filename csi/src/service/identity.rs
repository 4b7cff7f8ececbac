//! Identity RPC service (spec §2): plugin name/version and the probe
//! gate (spec §4.1).

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::arbiter::Arbiter;
use crate::csi::identity_server::Identity as IdentityTrait;
use crate::csi::{
    plugin_capability, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse,
    GetPluginInfoRequest, GetPluginInfoResponse, PluginCapability, ProbeRequest, ProbeResponse,
};
use crate::metrics::{Event, MetricsSink};
use crate::probe::Probe;
use crate::server::ProbeGate;

const PLUGIN_NAME: &str = "csi-lvm.mayadata.io";

pub struct Identity {
    pub arbiter: Arc<Arbiter>,
    pub probe: Arc<Probe>,
    pub gate: Arc<ProbeGate>,
    pub metrics: Arc<dyn MetricsSink>,
}

#[tonic::async_trait]
impl IdentityTrait for Identity {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        Ok(Response::new(GetPluginInfoResponse {
            name: PLUGIN_NAME.to_string(),
            vendor_version: git_version::git_version!(fallback = "unknown").to_string(),
            manifest: Default::default(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec![PluginCapability {
                r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
                    r#type: plugin_capability::service::Type::ControllerService as i32,
                })),
            }],
        }))
    }

    async fn probe(&self, request: Request<ProbeRequest>) -> Result<Response<ProbeResponse>, Status> {
        let cancel = tokio_util::sync::CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let _ = request;

        let probe = self.probe.clone();
        let result = self
            .arbiter
            .call_mutating("prb", None, cancel, move || async move { probe.run().await })
            .await;

        match result {
            Ok(()) => {
                self.gate.set_ready();
                self.metrics.record(Event::ProbeSucceeded);
                Ok(Response::new(ProbeResponse { ready: Some(true) }))
            }
            Err(err) => {
                self.metrics.record(Event::ProbeFailed {
                    reason: err.to_string(),
                });
                Err(err.into())
            }
        }
    }
}
