//! `csi-lvm-client`: a small debug CLI that dials the plugin's Unix
//! domain socket and issues a single RPC per invocation. Spiritual
//! successor of the teacher's jsonrpc-based control client, now talking
//! gRPC over the same transport the plugin itself serves on.

use clap::{Parser, Subcommand};
use csi_lvm_rpc::csi::controller_client::ControllerClient;
use csi_lvm_rpc::csi::identity_client::IdentityClient;
use csi_lvm_rpc::csi::node_client::NodeClient;
use csi_lvm_rpc::csi::volume_capability::{access_mode::Mode, AccessMode, AccessType, MountVolume};
use csi_lvm_rpc::csi::{
    CapacityRange, CreateVolumeRequest, DeleteVolumeRequest, GetCapacityRequest, GetPluginInfoRequest,
    ListVolumesRequest, NodePublishVolumeRequest, NodeUnpublishVolumeRequest, ProbeRequest, VolumeCapability,
};
use tonic::transport::{Channel, Endpoint, Uri};

#[derive(Parser)]
#[command(name = "csi-lvm-client", about = "Debug client for csi-lvm")]
struct Cli {
    /// Path of the Unix domain socket the plugin is listening on.
    #[arg(long, env = "CSI_ENDPOINT")]
    csi_endpoint: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Identity/GetPluginInfo.
    PluginInfo,
    /// Identity/Probe.
    Probe,
    /// Controller/CreateVolume.
    CreateVolume {
        name: String,
        #[arg(long, default_value_t = 0)]
        required_bytes: i64,
        #[arg(long, default_value = "ext4")]
        fs_type: String,
    },
    /// Controller/DeleteVolume.
    DeleteVolume { volume_id: String },
    /// Controller/ListVolumes.
    ListVolumes,
    /// Controller/GetCapacity.
    GetCapacity,
    /// Node/NodePublishVolume.
    NodePublishVolume {
        volume_id: String,
        target_path: String,
        #[arg(long, default_value = "ext4")]
        fs_type: String,
        #[arg(long)]
        readonly: bool,
    },
    /// Node/NodeUnpublishVolume.
    NodeUnpublishVolume { volume_id: String, target_path: String },
}

async fn connect(socket_path: std::path::PathBuf) -> Result<Channel, tonic::transport::Error> {
    Endpoint::try_from("http://[::]:50051")
        .expect("static URI is always valid")
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move { tokio::net::UnixStream::connect(socket_path).await }
        }))
        .await
}

fn mount_capability(fs_type: &str) -> VolumeCapability {
    VolumeCapability {
        access_type: Some(AccessType::Mount(MountVolume {
            fs_type: fs_type.to_string(),
            mount_flags: vec![],
        })),
        access_mode: Some(AccessMode {
            mode: Mode::SingleNodeWriter as i32,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let channel = connect(cli.csi_endpoint).await?;

    match cli.command {
        Command::PluginInfo => {
            let mut client = IdentityClient::new(channel);
            let resp = client.get_plugin_info(GetPluginInfoRequest {}).await?;
            println!("{:#?}", resp.into_inner());
        }
        Command::Probe => {
            let mut client = IdentityClient::new(channel);
            let resp = client.probe(ProbeRequest {}).await?;
            println!("{:#?}", resp.into_inner());
        }
        Command::CreateVolume {
            name,
            required_bytes,
            fs_type,
        } => {
            let mut client = ControllerClient::new(channel);
            let resp = client
                .create_volume(CreateVolumeRequest {
                    name,
                    capacity_range: Some(CapacityRange {
                        required_bytes,
                        limit_bytes: 0,
                    }),
                    volume_capabilities: vec![mount_capability(&fs_type)],
                    parameters: Default::default(),
                })
                .await?;
            println!("{:#?}", resp.into_inner());
        }
        Command::DeleteVolume { volume_id } => {
            let mut client = ControllerClient::new(channel);
            client.delete_volume(DeleteVolumeRequest { volume_id }).await?;
            println!("ok");
        }
        Command::ListVolumes => {
            let mut client = ControllerClient::new(channel);
            let resp = client
                .list_volumes(ListVolumesRequest {
                    max_entries: 0,
                    starting_token: String::new(),
                })
                .await?;
            println!("{:#?}", resp.into_inner());
        }
        Command::GetCapacity => {
            let mut client = ControllerClient::new(channel);
            let resp = client
                .get_capacity(GetCapacityRequest {
                    volume_capabilities: vec![],
                    parameters: Default::default(),
                })
                .await?;
            println!("{:#?}", resp.into_inner());
        }
        Command::NodePublishVolume {
            volume_id,
            target_path,
            fs_type,
            readonly,
        } => {
            let mut client = NodeClient::new(channel);
            client
                .node_publish_volume(NodePublishVolumeRequest {
                    volume_id,
                    target_path,
                    volume_capability: Some(mount_capability(&fs_type)),
                    readonly,
                    volume_context: Default::default(),
                })
                .await?;
            println!("ok");
        }
        Command::NodeUnpublishVolume { volume_id, target_path } => {
            let mut client = NodeClient::new(channel);
            client
                .node_unpublish_volume(NodeUnpublishVolumeRequest { volume_id, target_path })
                .await?;
            println!("ok");
        }
    }

    Ok(())
}
