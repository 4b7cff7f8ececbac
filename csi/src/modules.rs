//! Module inventory (spec §2 component 3, §4.1 step 1): reads
//! `/proc/modules` to verify that the kernel module backing a requested
//! filesystem is loaded and `Live`.

use async_trait::async_trait;

#[async_trait]
pub trait ModuleInventory: Send + Sync {
    async fn is_live(&self, module: &str) -> Result<bool, String>;
}

#[derive(Debug, Default, Clone)]
pub struct ProcModulesInventory;

impl ProcModulesInventory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModuleInventory for ProcModulesInventory {
    async fn is_live(&self, module: &str) -> Result<bool, String> {
        let contents = tokio::fs::read_to_string("/proc/modules")
            .await
            .map_err(|e| format!("reading /proc/modules: {}", e))?;
        Ok(parse_is_live(&contents, module))
    }
}

/// Maps a filesystem type to the kernel module name that backs it. Most
/// filesystems' module matches the fs type verbatim (ext4, xfs, btrfs);
/// a few common ones don't.
pub fn module_for_filesystem(fstype: &str) -> &str {
    match fstype {
        "ext2" | "ext3" | "ext4" => "ext4",
        other => other,
    }
}

fn parse_is_live(contents: &str, module: &str) -> bool {
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // name size instances deps state address
        if fields.len() >= 5 && fields[0] == module {
            return fields[4] == "Live";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
xfs 2021760 1 - Live 0xffffffffc0a6e000
ext4 999999 0 - Loading 0xffffffffc0aaa000
";

    #[test]
    fn finds_live_module() {
        assert!(parse_is_live(SAMPLE, "xfs"));
    }

    #[test]
    fn loading_state_does_not_count() {
        assert!(!parse_is_live(SAMPLE, "ext4"));
    }

    #[test]
    fn missing_module_is_not_live() {
        assert!(!parse_is_live(SAMPLE, "btrfs"));
    }

    #[test]
    fn maps_ext_variants_to_ext4_module() {
        assert_eq!(module_for_filesystem("ext2"), "ext4");
        assert_eq!(module_for_filesystem("xfs"), "xfs");
    }
}
