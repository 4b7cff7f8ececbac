//! LVM driver interface (spec §6). The core depends only on this trait;
//! `lvm::cli` provides the concrete implementation that shells out to
//! `pvcreate`/`vgcreate`/`lvcreate`/etc, the way the spec treats the real
//! command wrapper as an external collaborator.

pub mod cli;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

use std::path::PathBuf;

use async_trait::async_trait;

pub use crate::error::LvmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub device_path: PathBuf,
    pub volume_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
    pub physical_volumes: Vec<PathBuf>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub name: String,
    pub volume_group: String,
    pub capacity_bytes: u64,
    pub tags: Vec<String>,
    pub device_path: PathBuf,
}

/// Typed wrapper over the LVM command suite, per spec §6.
#[async_trait]
pub trait LvmDriver: Send + Sync {
    async fn pv_scan(&self) -> Result<(), LvmError>;
    async fn pv_create(&self, device: &std::path::Path) -> Result<(), LvmError>;
    async fn pv_remove(&self, device: &std::path::Path) -> Result<(), LvmError>;
    async fn pv_lookup(&self, device: &std::path::Path) -> Result<PhysicalVolume, LvmError>;

    async fn vg_create(
        &self,
        name: &str,
        pvs: &[PathBuf],
        tags: &[String],
    ) -> Result<(), LvmError>;
    async fn vg_lookup(&self, name: &str) -> Result<VolumeGroup, LvmError>;
    async fn vg_remove(&self, name: &str) -> Result<(), LvmError>;
    async fn vg_tags(&self, vg: &str) -> Result<Vec<String>, LvmError>;
    async fn vg_list_lv_names(&self, vg: &str) -> Result<Vec<String>, LvmError>;
    async fn vg_free_extents(&self, vg: &str) -> Result<u64, LvmError>;

    async fn lv_create(
        &self,
        vg: &str,
        name: &str,
        bytes: u64,
        tags: &[String],
    ) -> Result<LogicalVolume, LvmError>;
    async fn lv_lookup(&self, vg: &str, name: &str) -> Result<LogicalVolume, LvmError>;
    async fn lv_remove(&self, vg: &str, name: &str) -> Result<(), LvmError>;
    async fn lv_tags(&self, vg: &str, name: &str) -> Result<Vec<String>, LvmError>;
    async fn lv_device_path(&self, vg: &str, name: &str) -> Result<PathBuf, LvmError>;

    /// Validates a candidate LV name against the regex of spec §3:
    /// `[a-zA-Z0-9.+_-]+`, never starting with `-`.
    fn validate_lv_name(&self, name: &str) -> Result<(), String>;

    /// Validates a candidate tag against the syntax of spec §3.
    fn validate_tag(&self, tag: &str) -> Result<(), String>;
}

/// Validates an LV name the way the real `lvm` library does, producing
/// the exact wording Scenario D of spec §8 expects.
pub fn validate_lv_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(
            "validateLogicalVolumeName: Name contains invalid character, valid set includes: [a-zA-Z0-9.-_+].".to_string(),
        );
    }
    if name.starts_with('-') {
        return Err(
            "validateLogicalVolumeName: Name cannot start with '-'.".to_string(),
        );
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
    {
        return Err(
            "validateLogicalVolumeName: Name contains invalid character, valid set includes: [a-zA-Z0-9.-_+].".to_string(),
        );
    }
    Ok(())
}

pub fn validate_tag(tag: &str) -> Result<(), String> {
    crate::config::validate_tag_syntax(tag).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_with_spaces_or_slashes() {
        assert!(validate_lv_name("invalid name : /").is_err());
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_lv_name("v1").is_ok());
        assert!(validate_lv_name("v1-2.snap_3+x").is_ok());
    }

    #[test]
    fn rejects_leading_dash() {
        assert!(validate_lv_name("-v1").is_err());
    }
}
