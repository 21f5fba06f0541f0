use crate::source::timestamp::{format_instant, parse_timestamp};
use crate::storage::traits::{Collector, EventSearch, Generation, StorageError};
use crate::wire::read_events;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

const SEGMENT_EXTENSION: &str = ".est";

/// Name of the segment whose newest event has `last_time` and whose greatest
/// sid is `last_sid`: `2024-01-01T00_00_00Z[42].est`.
///
/// `:` is replaced since it is not allowed in file names everywhere.
pub fn segment_file_name(last_time: &DateTime<Utc>, last_sid: i64) -> String {
    format!(
        "{}[{}]{}",
        format_instant(last_time).replace(':', "_"),
        last_sid,
        SEGMENT_EXTENSION
    )
}

/// Catalog entry of one segment file, taken from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub last_sid: i64,
    pub last_time: DateTime<Utc>,
    pub path: PathBuf,
}

impl SegmentInfo {
    /// `None` if the file name is not a segment name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix(']')?;
        let (time, sid) = stem.rsplit_once('[')?;
        let last_sid = sid.parse::<i64>().ok()?;
        let last_time = parse_timestamp(&time.replace('_', ":")).ok()?;
        Some(Self {
            last_sid,
            last_time,
            path: path.to_path_buf(),
        })
    }

    /// False only if the segment certainly holds nothing matching `query`.
    fn may_match(&self, query: &EventSearch) -> bool {
        query.from_sid.map_or(true, |sid| self.last_sid >= sid)
            && query
                .from_time
                .map_or(true, |time| self.last_time.timestamp_millis() >= time)
    }
}

/// Immutable catalog of the segment files in the storage root.
#[derive(Debug, Clone, Default)]
pub struct DiskGeneration {
    segments: Vec<SegmentInfo>,
}

impl DiskGeneration {
    /// Catalog every segment in `root`. Other files are ignored.
    pub fn load(root: &Path) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            match SegmentInfo::from_path(&path) {
                Some(segment) => segments.push(segment),
                None => debug!(path = %path.display(), "Ignoring non-segment file"),
            }
        }
        segments.sort_by_key(|segment| segment.last_sid);
        Ok(Self { segments })
    }

    /// A catalog with `path` added. A path that is not a segment name leaves
    /// the catalog unchanged.
    pub fn with_file(&self, path: &Path) -> Self {
        let mut updated = self.clone();
        if let Some(segment) = SegmentInfo::from_path(path) {
            updated.segments.push(segment);
        }
        updated
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn file_count(&self) -> usize {
        self.segments.len()
    }

    /// Greatest sid stored in any segment.
    pub fn last_sid(&self) -> Option<i64> {
        self.segments.iter().map(|segment| segment.last_sid).max()
    }
}

impl Generation for DiskGeneration {
    fn search_event(
        &self,
        query: &EventSearch,
        collector: &mut Collector<'_>,
    ) -> Result<(), StorageError> {
        for segment in self.segments.iter().filter(|segment| segment.may_match(query)) {
            let reader = BufReader::new(File::open(&segment.path)?);
            read_events(reader, |event| {
                if query.matches(&event) {
                    collector(&event)?;
                }
                Ok::<(), StorageError>(())
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_segment_file_name() {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(segment_file_name(&time, 42), "2024-01-01T00_00_00Z[42].est");

        let fractional = time + chrono::Duration::milliseconds(250);
        assert_eq!(
            segment_file_name(&fractional, 7),
            "2024-01-01T00_00_00.250Z[7].est"
        );
    }

    #[test]
    fn test_segment_info_parses_own_names() {
        let time = Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 1).unwrap();
        let path = PathBuf::from("/data").join(segment_file_name(&time, 1234));
        let info = SegmentInfo::from_path(&path).unwrap();
        assert_eq!(info.last_sid, 1234);
        assert_eq!(info.last_time, time);
        assert_eq!(info.path, path);
    }

    #[test]
    fn test_segment_info_rejects_other_names() {
        for name in [
            "notes.txt",
            "2024-01-01T00_00_00Z[42].est.tmp",
            "2024-01-01T00_00_00Z[x].est",
            "garbage[42].est",
            "2024-01-01T00_00_00Z.est",
        ] {
            assert!(SegmentInfo::from_path(Path::new(name)).is_none(), "{}", name);
        }
    }

    #[test]
    fn test_load_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        fs::write(dir.path().join(segment_file_name(&time, 9)), "[]").unwrap();
        fs::write(dir.path().join(segment_file_name(&time, 3)), "[]").unwrap();
        fs::write(dir.path().join("readme.md"), "hello").unwrap();

        let disk = DiskGeneration::load(dir.path()).unwrap();
        assert_eq!(disk.file_count(), 2);
        assert_eq!(disk.segments()[0].last_sid, 3);
        assert_eq!(disk.last_sid(), Some(9));
    }

    #[test]
    fn test_with_file() {
        let disk = DiskGeneration::default();
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let added = disk.with_file(Path::new(&segment_file_name(&time, 5)));
        assert_eq!(added.file_count(), 1);
        assert_eq!(disk.file_count(), 0);

        let unchanged = added.with_file(Path::new("other.json"));
        assert_eq!(unchanged.file_count(), 1);
    }

    #[test]
    fn test_prefilter_skips_without_opening() {
        let dir = TempDir::new().unwrap();
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Unreadable content: the search fails if it ever opens the file
        fs::write(dir.path().join(segment_file_name(&time, 42)), "not json").unwrap();
        let disk = DiskGeneration::load(dir.path()).unwrap();

        let mut count = 0;
        disk.search_event(&EventSearch::from_sid(43), &mut |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        disk.search_event(&EventSearch::from_time(time.timestamp_millis() + 1), &mut |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);

        assert!(disk
            .search_event(&EventSearch::from_sid(42), &mut |_| Ok(()))
            .is_err());
    }
}
