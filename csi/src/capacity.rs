//! Pure capacity arithmetic shared by the volume service and the probe.
//!
//! Kept free of any LVM or mount state so the rounding rules (spec §4.3)
//! can be unit tested in isolation.

/// LVM's allocation unit. 2 MiB, matching the default `vgcreate` extent
/// size.
pub const EXTENT_SIZE: u64 = 2 * 1024 * 1024;

/// Extents LVM reserves for VG metadata on every volume group this
/// plugin creates.
pub const METADATA_EXTENTS: u64 = 2;

/// Round `bytes` up to the next multiple of [`EXTENT_SIZE`].
pub fn round_up_to_extent(bytes: u64) -> u64 {
    if bytes == 0 {
        return 0;
    }
    let extents = (bytes + EXTENT_SIZE - 1) / EXTENT_SIZE;
    extents * EXTENT_SIZE
}

/// Bytes usable by logical volumes in a freshly created VG spanning
/// `pv_bytes` (summed size of its physical volumes).
pub fn usable_vg_bytes(pv_bytes_total: u64) -> u64 {
    pv_bytes_total.saturating_sub(METADATA_EXTENTS * EXTENT_SIZE)
}

/// `free_extents × EXTENT_SIZE`, spec §4.3.
pub fn free_bytes(free_extents: u64) -> u64 {
    free_extents * EXTENT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_extent_boundary() {
        assert_eq!(round_up_to_extent(0), 0);
        assert_eq!(round_up_to_extent(1), EXTENT_SIZE);
        assert_eq!(round_up_to_extent(EXTENT_SIZE), EXTENT_SIZE);
        assert_eq!(round_up_to_extent(EXTENT_SIZE + 1), 2 * EXTENT_SIZE);
        assert_eq!(round_up_to_extent(80 * 1024 * 1024), 80 * 1024 * 1024);
    }

    #[test]
    fn usable_bytes_reserves_metadata_extents() {
        let pv = 100 * 1024 * 1024;
        assert_eq!(usable_vg_bytes(pv), pv - 2 * EXTENT_SIZE);
    }

    #[test]
    fn free_bytes_is_extent_multiple() {
        assert_eq!(free_bytes(8), 8 * EXTENT_SIZE);
    }

    /// Scenario A from the spec: 100 MiB loop device, 80 MiB volume.
    #[test]
    fn scenario_a_capacity_accounting() {
        let total = usable_vg_bytes(100 * 1024 * 1024);
        let allocated = round_up_to_extent(80 * 1024 * 1024);
        let remaining = total - allocated;
        assert_eq!(remaining, 16 * 1024 * 1024);
    }
}
