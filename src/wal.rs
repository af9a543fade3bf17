use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes can only come from a corrupt tail.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely, or report `false` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact event and its framed size. `None` means end of log:
/// EOF, a torn tail, a CRC mismatch or an undecodable payload.
fn read_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, len as u64 + 8)))
}

/// Append-only event log backing the schedule, bookings and announcements.
///
/// A crash can only leave a torn final record; replay stops at the first
/// record whose length prefix or checksum does not hold.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event; nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a full snapshot next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// All intact events in order, plus the byte length they occupy.
    /// A missing file is an empty log.
    fn read_intact(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut intact = 0;
        while let Some((event, size)) = read_event(&mut reader)? {
            events.push(event);
            intact += size;
        }
        Ok((events, intact))
    }

    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::read_intact(path).map(|(events, _)| events)
    }

    /// Replay, then cut off any damaged tail so later appends stay reachable.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, intact) = Self::read_intact(path)?;
        match fs::metadata(path) {
            Ok(meta) if meta.len() > intact => {
                tracing::warn!(
                    "truncating damaged WAL tail: {} of {} bytes intact",
                    intact,
                    meta.len()
                );
                OpenOptions::new().write(true).open(path)?.set_len(intact)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    use crate::model::{Announcement, EventKind, ScheduleEntry};
    use crate::slots::SlotIndex;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vespers_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(slot: u16) -> Event {
        Event::ScheduleEntryCreated {
            entry: ScheduleEntry {
                id: Ulid::new(),
                kind: EventKind::Matrimony,
                date: NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
                slot: SlotIndex(slot),
                place: "St. Joseph Cathedral".into(),
                officiant: Some("Fr. Santos".into()),
                booking_id: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            created(0),
            Event::AnnouncementPosted {
                announcement: Announcement {
                    id: Ulid::new(),
                    content: "Office closed on Monday".into(),
                    active: true,
                    created_at: Utc::now(),
                },
            },
            Event::BookingRejected { id: Ulid::new() },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = created(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = created(2);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&created(3)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        // A valid record after the corrupt one must not be resurrected.
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(4)).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn recover_truncates_so_new_appends_replay() {
        let path = tmp_path("recover.wal");
        let good = created(0);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[200u8, 0, 0, 0, 7]).unwrap();
        }
        assert_eq!(Wal::recover(&path).unwrap(), vec![good.clone()]);

        let next = created(1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&next).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good, next]);
    }

    #[test]
    fn compaction_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let keep = created(0);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keep).unwrap();
        for _ in 0..20 {
            let churn = created(5);
            let Event::ScheduleEntryCreated { entry } = &churn else {
                unreachable!()
            };
            let id = entry.id;
            wal.append(&churn).unwrap();
            wal.append(&Event::ScheduleEntryDeleted { id }).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&keep)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let next = created(6);
        wal.append(&next).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, next]);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(created).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
