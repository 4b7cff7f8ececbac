//! Configuration surface (spec §3, §6): parsed once at process start and
//! frozen behind an `Arc` for the lifetime of the server.

use std::path::PathBuf;

use clap::Parser;

use crate::error::CoreError;

/// Default request-admission budget (spec §6).
pub const DEFAULT_REQUEST_LIMIT: usize = 10;

/// Default volume size used when a `CreateVolume` call omits a capacity
/// range.
pub const DEFAULT_VOLUME_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "csi-lvm-plugin",
    version,
    about = "Node-local CSI storage plugin backed by a single LVM volume group"
)]
pub struct Cli {
    /// Path of the Unix domain socket the three CSI services are served on.
    #[arg(long, env = "CSI_ENDPOINT")]
    pub csi_endpoint: PathBuf,

    /// Identifier of the node this process is running on (used for
    /// `NodeGetInfo`).
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Name of the volume group this plugin owns.
    #[arg(long)]
    pub volume_group: String,

    /// Block devices that must collectively back the volume group.
    #[arg(long = "device", required = true)]
    pub device_paths: Vec<PathBuf>,

    /// Filesystem used when a create request doesn't specify one.
    #[arg(long, default_value = "ext4")]
    pub default_fs: String,

    /// Filesystems this node is willing to format on publish, subject to
    /// the kernel modules actually being loaded (spec §4.1 step 1).
    #[arg(long = "supported-fs", value_delimiter = ',', default_value = "ext4,xfs")]
    pub supported_filesystems: Vec<String>,

    /// Tags applied to the volume group and every logical volume it
    /// creates.
    #[arg(long = "tag", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Default logical volume size in bytes, used when a create request
    /// omits a capacity range.
    #[arg(long, default_value_t = DEFAULT_VOLUME_SIZE_BYTES)]
    pub default_volume_size: u64,

    /// Run only to dismantle the volume group; all other RPCs fail with
    /// `FailedPrecondition` (spec §4.1 step 5).
    #[arg(long)]
    pub remove: bool,

    /// Upper bound on in-flight + queued mutating RPCs (spec §4.6a).
    #[arg(long, default_value_t = DEFAULT_REQUEST_LIMIT)]
    pub request_limit: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub volume_group_name: String,
    pub device_paths: Vec<PathBuf>,
    pub default_filesystem: String,
    pub supported_filesystems: Vec<String>,
    pub tags: Vec<String>,
    pub default_volume_size: u64,
    pub remove_mode: bool,
    pub request_limit: usize,
    pub csi_endpoint: PathBuf,
    pub node_id: String,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, CoreError> {
        if cli.device_paths.is_empty() {
            return Err(CoreError::invalid_argument(
                "at least one --device is required",
            ));
        }
        for tag in &cli.tags {
            validate_tag_syntax(tag)?;
        }

        Ok(Config {
            volume_group_name: cli.volume_group,
            device_paths: cli.device_paths,
            default_filesystem: cli.default_fs,
            supported_filesystems: cli.supported_filesystems,
            tags: cli.tags,
            default_volume_size: cli.default_volume_size,
            remove_mode: cli.remove,
            request_limit: cli.request_limit,
            csi_endpoint: cli.csi_endpoint,
            node_id: cli.node_id,
        })
    }
}

/// Tag syntax per spec §3: `[A-Za-z0-9_+.-]`, must not begin with `-`.
pub fn validate_tag_syntax(tag: &str) -> Result<(), CoreError> {
    if tag.starts_with('-') {
        return Err(CoreError::invalid_argument(format!(
            "tag '{}' must not begin with '-'",
            tag
        )));
    }
    if tag.is_empty()
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '.' | '-'))
    {
        return Err(CoreError::invalid_argument(format!(
            "tag '{}' contains characters outside [A-Za-z0-9_+.-]",
            tag
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tag_starting_with_dash() {
        assert!(validate_tag_syntax("-bad").is_err());
    }

    #[test]
    fn rejects_tag_with_invalid_characters() {
        assert!(validate_tag_syntax("bad tag").is_err());
        assert!(validate_tag_syntax("bad/tag").is_err());
    }

    #[test]
    fn accepts_valid_tags() {
        assert!(validate_tag_syntax("csi-lvm.node-01_v1+beta").is_ok());
    }
}
