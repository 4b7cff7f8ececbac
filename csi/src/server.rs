//! Server facade (spec §2, component 7): wires validator → arbiter →
//! volume service → external collaborators and exposes the result as
//! the three CSI gRPC services, served over a Unix domain socket.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tonic::transport::Server as TonicServer;

use crate::arbiter::Arbiter;
use crate::config::Config;
use crate::csi::controller_server::ControllerServer;
use crate::csi::identity_server::IdentityServer;
use crate::csi::node_server::NodeServer;
use crate::lvm::LvmDriver;
use crate::metrics::MetricsSink;
use crate::modules::ModuleInventory;
use crate::mount::MountAdapter;
use crate::probe::Probe;
use crate::service::{controller::Controller, identity::Identity, node::Node};
use crate::validator::Validator;
use crate::volume::VolumeService;

/// Tracks whether `Probe` has ever succeeded. Every Controller/Node RPC
/// besides Identity consults this before doing any work (spec §4.1:
/// "Until it returns success the server will not accept any mutating
/// Controller or Node RPC").
#[derive(Default)]
pub struct ProbeGate {
    ready: AtomicBool,
}

impl ProbeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn ensure_ready(&self) -> Result<(), crate::error::CoreError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(crate::error::CoreError::failed_precondition(
                "Plugin has not yet completed a successful Probe",
            ))
        }
    }
}

pub struct PluginServer {
    config: Arc<Config>,
    arbiter: Arc<Arbiter>,
    volume_service: Arc<VolumeService>,
    validator: Arc<Validator>,
    probe: Arc<Probe>,
    gate: Arc<ProbeGate>,
    metrics: Arc<dyn MetricsSink>,
}

impl PluginServer {
    pub fn new(
        config: Arc<Config>,
        lvm: Arc<dyn LvmDriver>,
        mounts: Arc<dyn MountAdapter>,
        modules: Arc<dyn ModuleInventory>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let arbiter = Arc::new(Arbiter::new(config.request_limit));
        let volume_service = Arc::new(VolumeService::new(
            config.clone(),
            lvm.clone(),
            mounts.clone(),
            metrics.clone(),
        ));
        let validator = Arc::new(Validator::new(
            config.supported_filesystems.clone(),
            config.remove_mode,
        ));
        let probe = Arc::new(Probe::new(config.clone(), lvm, mounts, modules));

        Self {
            config,
            arbiter,
            volume_service,
            validator,
            probe,
            gate: Arc::new(ProbeGate::new()),
            metrics,
        }
    }

    /// Binds the Unix domain socket named by `Config::csi_endpoint` and
    /// serves the three CSI services until the process is terminated.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let socket_path = self.config.csi_endpoint.clone();
        remove_stale_socket(&socket_path)?;
        let listener = tokio::net::UnixListener::bind(&socket_path)?;
        log::info!("listening on unix://{}", socket_path.display());

        let incoming = {
            use futures::stream::TryStreamExt;
            tokio_stream_compat(listener).map_ok(TonicUnixStream)
        };

        let identity = Identity {
            arbiter: self.arbiter.clone(),
            probe: self.probe.clone(),
            gate: self.gate.clone(),
            metrics: self.metrics.clone(),
        };
        let controller = Controller {
            config: self.config.clone(),
            arbiter: self.arbiter.clone(),
            volume_service: self.volume_service.clone(),
            validator: self.validator.clone(),
            gate: self.gate.clone(),
        };
        let node = Node {
            config: self.config.clone(),
            arbiter: self.arbiter.clone(),
            volume_service: self.volume_service.clone(),
            validator: self.validator.clone(),
            gate: self.gate.clone(),
        };

        TonicServer::builder()
            .add_service(IdentityServer::new(identity))
            .add_service(ControllerServer::new(controller))
            .add_service(NodeServer::new(node))
            .serve_with_incoming(incoming)
            .await?;
        Ok(())
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Adapts a `UnixListener` into a `TryStream` of accepted connections,
/// without pulling in `tokio-stream` for a single call site.
fn tokio_stream_compat(
    listener: tokio::net::UnixListener,
) -> impl futures::Stream<Item = std::io::Result<tokio::net::UnixStream>> {
    futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await.map(|(stream, _addr)| stream);
        Some((accepted, listener))
    })
}

/// `tonic`'s HTTP/2 transport wants its incoming connections to
/// implement `tonic::transport::server::Connected`; `UnixStream`
/// doesn't carry peer-certificate info so the impl is a unit struct.
struct TonicUnixStream(tokio::net::UnixStream);

impl tonic::transport::server::Connected for TonicUnixStream {
    type ConnectInfo = ();
    fn connect_info(&self) -> Self::ConnectInfo {}
}

impl tokio::io::AsyncRead for TonicUnixStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for TonicUnixStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }
    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }
    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}
