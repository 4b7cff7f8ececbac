//! Stateless request-shape validator (spec §4.5): the pre-filter applied
//! to every inbound request before the arbiter ever sees it.

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    Unknown,
}

#[derive(Debug, Clone)]
pub enum AccessType {
    Block,
    Mount { fs_type: String },
}

#[derive(Debug, Clone)]
pub struct Capability {
    pub access_type: AccessType,
    pub access_mode: AccessMode,
}

pub struct Validator {
    pub supported_filesystems: Vec<String>,
    pub remove_mode: bool,
}

impl Validator {
    pub fn new(supported_filesystems: Vec<String>, remove_mode: bool) -> Self {
        Self {
            supported_filesystems,
            remove_mode,
        }
    }

    /// Every mutating RPC must reject with `FailedPrecondition` while the
    /// server is in remove mode (spec §4.5).
    pub fn reject_if_remove_mode(&self) -> Result<(), CoreError> {
        if self.remove_mode {
            return Err(CoreError::failed_precondition(
                "This service is running in 'remove volume group' mode.",
            ));
        }
        Ok(())
    }

    pub fn require_non_empty(field: &str, value: &str) -> Result<(), CoreError> {
        if value.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "missing required field: {}",
                field
            )));
        }
        Ok(())
    }

    /// Validates a single capability for CreateVolume/NodePublishVolume.
    /// `tolerate_unsupported_fs` relaxes the "unsupported filesystem"
    /// check for GetCapacity, which encodes "unsupported" as zero
    /// capacity rather than an error (spec §4.5).
    pub fn validate_capability(
        &self,
        cap: &Capability,
        tolerate_unsupported_fs: bool,
    ) -> Result<(), CoreError> {
        match cap.access_mode {
            AccessMode::Unknown => {
                return Err(CoreError::invalid_argument("Unknown or unspecified access mode"));
            }
            AccessMode::MultiNodeReaderOnly
            | AccessMode::MultiNodeSingleWriter
            | AccessMode::MultiNodeMultiWriter => {
                return Err(CoreError::invalid_argument(
                    "Unsupported access mode: MULTI_NODE_* is not supported",
                ));
            }
            AccessMode::SingleNodeReaderOnly => {
                if matches!(cap.access_type, AccessType::Block) {
                    return Err(CoreError::invalid_argument(
                        "Block volumes do not support SINGLE_NODE_READER_ONLY",
                    ));
                }
            }
            AccessMode::SingleNodeWriter => {}
        }

        if let AccessType::Mount { fs_type } = &cap.access_type {
            if !fs_type.is_empty()
                && !tolerate_unsupported_fs
                && !self.supported_filesystems.iter().any(|f| f == fs_type)
            {
                return Err(CoreError::failed_precondition(format!(
                    "Unsupported filesystem type: {}",
                    fs_type
                )));
            }
        }

        Ok(())
    }

    pub fn validate_capabilities(
        &self,
        caps: &[Capability],
        tolerate_unsupported_fs: bool,
    ) -> Result<(), CoreError> {
        if caps.is_empty() {
            return Err(CoreError::invalid_argument("missing required field: volume_capabilities"));
        }
        for cap in caps {
            self.validate_capability(cap, tolerate_unsupported_fs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(vec!["ext4".into(), "xfs".into()], false)
    }

    #[test]
    fn rejects_when_in_remove_mode() {
        let v = Validator::new(vec![], true);
        assert!(v.reject_if_remove_mode().is_err());
    }

    #[test]
    fn rejects_block_with_reader_only() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Block,
            access_mode: AccessMode::SingleNodeReaderOnly,
        };
        assert!(v.validate_capability(&cap, false).is_err());
    }

    #[test]
    fn rejects_multi_node_modes() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Mount { fs_type: "ext4".into() },
            access_mode: AccessMode::MultiNodeSingleWriter,
        };
        assert!(v.validate_capability(&cap, false).is_err());
    }

    #[test]
    fn rejects_unknown_mode() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Mount { fs_type: "ext4".into() },
            access_mode: AccessMode::Unknown,
        };
        assert!(v.validate_capability(&cap, false).is_err());
    }

    #[test]
    fn rejects_unsupported_filesystem() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Mount { fs_type: "zfs".into() },
            access_mode: AccessMode::SingleNodeWriter,
        };
        assert!(v.validate_capability(&cap, false).is_err());
    }

    #[test]
    fn get_capacity_tolerates_unsupported_filesystem() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Mount { fs_type: "zfs".into() },
            access_mode: AccessMode::SingleNodeWriter,
        };
        assert!(v.validate_capability(&cap, true).is_ok());
    }

    #[test]
    fn accepts_ordinary_mount_capability() {
        let v = validator();
        let cap = Capability {
            access_type: AccessType::Mount { fs_type: "xfs".into() },
            access_mode: AccessMode::SingleNodeWriter,
        };
        assert!(v.validate_capability(&cap, false).is_ok());
    }
}
