//! Parser for the `/proc/self/mountinfo` format (`proc(5)`), the kernel's
//! own mount table and the spec's sole source of truth for publications
//! (spec §3, §4.2.3, §4.2.4).
//!
//! Format (whitespace-separated, one record per line):
//!   36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//!   (1)(2)(3)   (4)   (5)      (6)      (7)   (8) (9)   (10)         (11)
//!
//! Fields 1-6 and 8 are fixed; field 7 is a variable-length list of
//! optional fields terminated by a literal `-` separator (field 8),
//! followed by filesystem type, mount source, and super options.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Field 4: the root of the bind mount within the filesystem.
    pub root: String,
    /// Field 5: the mount point relative to the process root.
    pub path: String,
    /// Field 9: filesystem type.
    pub fstype: String,
    /// Field 11: per-mount options.
    pub options: Vec<String>,
    /// Field 10: mount source (device, or another mount's path for a
    /// bind mount).
    pub source: String,
}

pub fn parse(contents: &str) -> Result<Vec<MountRecord>, String> {
    contents.lines().filter(|l| !l.trim().is_empty()).map(parse_line).collect()
}

fn parse_line(line: &str) -> Result<MountRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return Err(format!("malformed mountinfo line: {}", line));
    }

    let root = fields[3].to_string();
    let path = fields[4].to_string();

    // Field 7 is a variable-length run of optional fields; find the `-`
    // separator rather than assuming a fixed index.
    let sep_index = fields[6..]
        .iter()
        .position(|f| *f == "-")
        .map(|i| i + 6)
        .ok_or_else(|| format!("mountinfo line missing '-' separator: {}", line))?;

    let rest = &fields[sep_index + 1..];
    if rest.len() < 3 {
        return Err(format!("mountinfo line missing fstype/source/options: {}", line));
    }
    let fstype = rest[0].to_string();
    let source = rest[1].to_string();
    let options = rest[2].split(',').map(String::from).collect();

    Ok(MountRecord {
        root,
        path,
        fstype,
        options,
        source,
    })
}

/// True if `target` currently has something mounted on it. When `source`
/// is `Some`, the mount must additionally originate from that device
/// (used for the idempotence checks of spec §4.2.3/§4.2.4).
pub fn find_mount<'a>(
    records: &'a [MountRecord],
    target: &str,
    source: Option<&str>,
) -> Option<&'a MountRecord> {
    records
        .iter()
        .rev()
        .find(|r| r.path == target && source.map(|s| r.source == s).unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue\n\
36 35 98:0 / /data rw shared:1 - xfs /dev/mapper/vg-lv rw,relatime";

    #[test]
    fn parses_bind_and_plain_mounts() {
        let records = parse(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].root, "/mnt1");
        assert_eq!(records[0].path, "/mnt2");
        assert_eq!(records[0].fstype, "ext3");
        assert_eq!(records[0].source, "/dev/root");
        assert_eq!(records[0].options, vec!["rw", "errors=continue"]);

        assert_eq!(records[1].path, "/data");
        assert_eq!(records[1].source, "/dev/mapper/vg-lv");
    }

    #[test]
    fn find_mount_matches_on_target_and_source() {
        let records = parse(SAMPLE).unwrap();
        assert!(find_mount(&records, "/data", Some("/dev/mapper/vg-lv")).is_some());
        assert!(find_mount(&records, "/data", Some("/dev/other")).is_none());
        assert!(find_mount(&records, "/nowhere", None).is_none());
    }

    #[test]
    fn rejects_line_without_separator() {
        assert!(parse_line("36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 ext3 /dev/root rw").is_err());
    }
}
