//! Concrete [`LvmDriver`] built on top of the `pvcreate`/`vgcreate`/
//! `lvcreate`/… command-line suite, shelled out to with typed argument
//! vectors (never through a shell string) the way the rest of the LVM
//! command wrappers in this ecosystem do it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{LogicalVolume, LvmDriver, LvmError, PhysicalVolume, VolumeGroup};

#[derive(Debug, Default, Clone)]
pub struct CliLvmDriver;

impl CliLvmDriver {
    pub fn new() -> Self {
        Self
    }

    fn device_path(vg: &str, lv: &str) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", vg, lv))
    }
}

/// Runs `cmd` with `args`, returning stdout on success. stderr is folded
/// verbatim into the error so it survives up to the RPC status message
/// (spec §7: "LVM driver layer's string errors are embedded verbatim").
async fn run(cmd: &str, args: &[&str]) -> Result<String, LvmError> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| LvmError::Other(format!("failed to exec {}: {}", cmd, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(LvmError::Other(format!(
            "{} {}: err={} ({})",
            cmd,
            args.join(" "),
            stderr,
            output.status.code().unwrap_or(-1)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn parse_report<'a>(stdout: &'a str, section: &str) -> Result<Vec<Value>, LvmError> {
    let parsed: Value = serde_json::from_str(stdout)
        .map_err(|e| LvmError::Other(format!("failed to parse lvm json report: {}", e)))?;
    let rows = parsed["report"]
        .as_array()
        .and_then(|reports| reports.first())
        .and_then(|r| r[section].as_array())
        .cloned()
        .unwrap_or_default();
    Ok(rows)
}

fn field(row: &Value, key: &str) -> String {
    row[key].as_str().unwrap_or_default().to_string()
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',').filter(|s| !s.is_empty()).map(String::from).collect()
}

#[async_trait]
impl LvmDriver for CliLvmDriver {
    async fn pv_scan(&self) -> Result<(), LvmError> {
        run("pvscan", &["--cache"]).await?;
        Ok(())
    }

    async fn pv_create(&self, device: &Path) -> Result<(), LvmError> {
        let device = device.to_string_lossy();
        run("pvcreate", &["-y", "-ff", &device]).await?;
        Ok(())
    }

    async fn pv_remove(&self, device: &Path) -> Result<(), LvmError> {
        let device = device.to_string_lossy();
        run("pvremove", &["-y", "-ff", &device]).await?;
        Ok(())
    }

    async fn pv_lookup(&self, device: &Path) -> Result<PhysicalVolume, LvmError> {
        let device_str = device.to_string_lossy().to_string();
        let out = run(
            "pvs",
            &[
                "--reportformat",
                "json",
                "--noheadings",
                "-o",
                "pv_name,vg_name",
                &device_str,
            ],
        )
        .await
        .map_err(|_| LvmError::NotFound(format!("physical volume not found: {}", device_str)))?;

        let rows = parse_report(&out, "pv")?;
        let row = rows
            .first()
            .ok_or_else(|| LvmError::NotFound(format!("physical volume not found: {}", device_str)))?;

        let vg_name = field(row, "vg_name");
        Ok(PhysicalVolume {
            device_path: device.to_path_buf(),
            volume_group: if vg_name.is_empty() { None } else { Some(vg_name) },
        })
    }

    async fn vg_create(
        &self,
        name: &str,
        pvs: &[PathBuf],
        tags: &[String],
    ) -> Result<(), LvmError> {
        let mut args: Vec<String> = vec![name.to_string()];
        for pv in pvs {
            args.push(pv.to_string_lossy().to_string());
        }
        for tag in tags {
            args.push("--addtag".to_string());
            args.push(tag.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run("vgcreate", &arg_refs).await?;
        Ok(())
    }

    async fn vg_lookup(&self, name: &str) -> Result<VolumeGroup, LvmError> {
        let vg_out = run(
            "vgs",
            &["--reportformat", "json", "--noheadings", "-o", "vg_name,vg_tags", name],
        )
        .await
        .map_err(|_| LvmError::NotFound(format!("volume group not found: {}", name)))?;
        let vg_rows = parse_report(&vg_out, "vg")?;
        let vg_row = vg_rows
            .first()
            .ok_or_else(|| LvmError::NotFound(format!("volume group not found: {}", name)))?;
        let tags = parse_tags(&field(vg_row, "vg_tags"));

        let pv_out = run(
            "pvs",
            &[
                "--reportformat",
                "json",
                "--noheadings",
                "-o",
                "pv_name",
                "-S",
                &format!("vg_name={}", name),
            ],
        )
        .await?;
        let pv_rows = parse_report(&pv_out, "pv")?;
        let physical_volumes = pv_rows
            .iter()
            .map(|r| PathBuf::from(field(r, "pv_name")))
            .collect();

        Ok(VolumeGroup {
            name: name.to_string(),
            physical_volumes,
            tags,
        })
    }

    async fn vg_remove(&self, name: &str) -> Result<(), LvmError> {
        run("vgremove", &["-f", name]).await?;
        Ok(())
    }

    async fn vg_tags(&self, vg: &str) -> Result<Vec<String>, LvmError> {
        Ok(self.vg_lookup(vg).await?.tags)
    }

    async fn vg_list_lv_names(&self, vg: &str) -> Result<Vec<String>, LvmError> {
        let out = run(
            "lvs",
            &["--reportformat", "json", "--noheadings", "-o", "lv_name", vg],
        )
        .await?;
        let rows = parse_report(&out, "lv")?;
        Ok(rows.iter().map(|r| field(r, "lv_name")).collect())
    }

    async fn vg_free_extents(&self, vg: &str) -> Result<u64, LvmError> {
        let out = run(
            "vgs",
            &[
                "--reportformat",
                "json",
                "--noheadings",
                "-o",
                "vg_free_count",
                vg,
            ],
        )
        .await
        .map_err(|_| LvmError::NotFound(format!("volume group not found: {}", vg)))?;
        let rows = parse_report(&out, "vg")?;
        let row = rows
            .first()
            .ok_or_else(|| LvmError::NotFound(format!("volume group not found: {}", vg)))?;
        field(row, "vg_free_count")
            .parse::<u64>()
            .map_err(|e| LvmError::Other(format!("unparsable vg_free_count: {}", e)))
    }

    async fn lv_create(
        &self,
        vg: &str,
        name: &str,
        bytes: u64,
        tags: &[String],
    ) -> Result<LogicalVolume, LvmError> {
        let size_arg = format!("{}b", bytes);
        let mut args: Vec<String> = vec![
            "-n".into(),
            name.to_string(),
            "-L".into(),
            size_arg,
        ];
        for tag in tags {
            args.push("--addtag".to_string());
            args.push(tag.clone());
        }
        args.push(vg.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run("lvcreate", &arg_refs).await?;
        self.lv_lookup(vg, name).await
    }

    async fn lv_lookup(&self, vg: &str, name: &str) -> Result<LogicalVolume, LvmError> {
        let full = format!("{}/{}", vg, name);
        let out = run(
            "lvs",
            &[
                "--reportformat",
                "json",
                "--noheadings",
                "--units",
                "b",
                "--nosuffix",
                "-o",
                "lv_name,lv_tags,lv_size",
                &full,
            ],
        )
        .await
        .map_err(|_| LvmError::NotFound(format!("logical volume not found: {}", full)))?;
        let rows = parse_report(&out, "lv")?;
        let row = rows
            .first()
            .ok_or_else(|| LvmError::NotFound(format!("logical volume not found: {}", full)))?;

        let size_raw = field(row, "lv_size");
        let capacity_bytes = size_raw
            .trim()
            .parse::<f64>()
            .map_err(|e| LvmError::Other(format!("unparsable lv_size '{}': {}", size_raw, e)))?
            as u64;

        Ok(LogicalVolume {
            name: name.to_string(),
            volume_group: vg.to_string(),
            capacity_bytes,
            tags: parse_tags(&field(row, "lv_tags")),
            device_path: Self::device_path(vg, name),
        })
    }

    async fn lv_remove(&self, vg: &str, name: &str) -> Result<(), LvmError> {
        run("lvremove", &["-f", &format!("{}/{}", vg, name)]).await?;
        Ok(())
    }

    async fn lv_tags(&self, vg: &str, name: &str) -> Result<Vec<String>, LvmError> {
        Ok(self.lv_lookup(vg, name).await?.tags)
    }

    async fn lv_device_path(&self, vg: &str, name: &str) -> Result<PathBuf, LvmError> {
        Ok(Self::device_path(vg, name))
    }

    fn validate_lv_name(&self, name: &str) -> Result<(), String> {
        super::validate_lv_name(name)
    }

    fn validate_tag(&self, tag: &str) -> Result<(), String> {
        super::validate_tag(tag)
    }
}
