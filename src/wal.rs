use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single frame's payload. A frame claiming more than
/// this is treated as tail damage, not an allocation request.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Per-tenant append-only event log.
///
/// Frame layout, little-endian: `[u32 payload_len][u32 crc32][payload]`
/// with the payload bincode-encoded. Only the tail can be damaged by a
/// crash; `load` stops at the first frame that fails the length or
/// checksum test and returns everything before it.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    /// Frames appended since the last snapshot install.
    dirty: u64,
}

fn write_frame(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    out.write_all(&payload)
}

/// Fill `buf`, reporting a clean end-of-log as `false`.
fn read_fully(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next payload, or `None` at end-of-log or a damaged tail.
fn read_frame(input: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 8];
    if !read_fully(input, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(header[..4].try_into().unwrap()) as usize;
    let crc = u32::from_le_bytes(header[4..].try_into().unwrap());
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_fully(input, &mut payload)? {
        return Ok(None);
    }
    if crc32fast::hash(&payload) != crc {
        return Ok(None);
    }
    Ok(Some(payload))
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { out: BufWriter::new(file), path: path.to_path_buf(), dirty: 0 })
    }

    /// Frame an event into the write buffer. Nothing is durable until
    /// `sync`; the group-commit writer batches many buffers per sync.
    pub fn buffer(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.out, event)?;
        self.dirty += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()
    }

    /// Buffer + sync in one step. Test convenience; production appends
    /// go through the group-commit writer.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.buffer(event)?;
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_since_snapshot(&self) -> u64 {
        self.dirty
    }

    /// Phase one of compaction: write the replacement log next to the
    /// live one and fsync it. Slow I/O, safe to run while appends are
    /// still landing in the live file.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let staging = path.with_extension("snap");
        let mut out = BufWriter::new(File::create(&staging)?);
        for event in events {
            write_frame(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Phase two: rename the staged snapshot over the live log and
    /// reopen for appending. Must not race with `buffer`/`sync`, so the
    /// writer task is the only caller.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("snap"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        self.dirty = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn snapshot(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.install_snapshot()
    }

    /// Read every intact event back. A missing file is an empty log.
    pub fn load(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut input = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(payload) = read_frame(&mut input)? {
            match bincode::deserialize(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agendar_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn booked(cpf: &str) -> Event {
        let key = SlotKey::new(Ulid::new(), 946_684_800_000 + 2 * DAY_MS, 9 * 3_600_000);
        Event::Booked {
            appointment: Appointment::new(
                Ulid::new(),
                "sp".into(),
                key,
                Citizen {
                    name: "Ana Souza".into(),
                    cpf: cpf.into(),
                    phone: Some("+55 11 99999-0000".into()),
                    email: None,
                    street: None,
                    number: None,
                    district: None,
                    city: None,
                },
                false,
                None,
                1000,
            ),
        }
    }

    fn location(name: &str) -> Event {
        Event::LocationRegistered { id: Ulid::new(), name: Some(name.into()), max_per_slot: 2 }
    }

    #[test]
    fn load_returns_what_was_appended() {
        let path = scratch("roundtrip.wal");
        let events = vec![location("Poupatempo Sé"), booked("11122233344")];

        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append(e).unwrap();
        }
        drop(wal);

        assert_eq!(Wal::load(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_empty_log() {
        let path = scratch("missing.wal");
        assert!(Wal::load(&path).unwrap().is_empty());
    }

    #[test]
    fn damaged_tail_is_dropped() {
        let path = scratch("torn_tail.wal");
        let keep = booked("11122233344");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keep).unwrap();
        drop(wal);

        // A torn frame after the good one: header present, payload cut.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[40, 0, 0, 0, 9, 9, 9, 9, 1, 2, 3]).unwrap();

        assert_eq!(Wal::load(&path).unwrap(), vec![keep]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn checksum_mismatch_stops_the_load() {
        let path = scratch("bad_crc.wal");
        let payload = bincode::serialize(&Event::Deleted { id: Ulid::new() }).unwrap();

        let mut f = File::create(&path).unwrap();
        f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        f.write_all(&payload).unwrap();

        assert!(Wal::load(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn absurd_frame_length_is_tail_damage() {
        let path = scratch("absurd_len.wal");
        let good = location("Sé");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&good).unwrap();
        drop(wal);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        f.write_all(&[0; 4]).unwrap();

        assert_eq!(Wal::load(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn snapshot_shrinks_the_log_and_keeps_state() {
        let path = scratch("snapshot.wal");
        let keeper = location("Sé");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keeper).unwrap();
        // Churn that the snapshot should erase.
        for _ in 0..10 {
            let block = BlockedDate {
                id: Ulid::new(),
                tenant: "sp".into(),
                date: 946_684_800_000,
                kind: BlockKind::FullDay,
                reason: "obras".into(),
                created_by: "staff".into(),
                created_at: 0,
            };
            let id = block.id;
            wal.append(&Event::DateBlocked { block }).unwrap();
            wal.append(&Event::DateUnblocked { id, date: 946_684_800_000 }).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.snapshot(std::slice::from_ref(&keeper)).unwrap();
        assert_eq!(wal.records_since_snapshot(), 0);
        drop(wal);

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "snapshot should shrink the log: {after} < {before}");
        assert_eq!(Wal::load(&path).unwrap(), vec![keeper]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_after_a_snapshot_survive() {
        let path = scratch("snapshot_append.wal");
        let base = location("Centro");
        let later = booked("99988877766");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&base).unwrap();
        wal.snapshot(std::slice::from_ref(&base)).unwrap();
        wal.append(&later).unwrap();
        drop(wal);

        assert_eq!(Wal::load(&path).unwrap(), vec![base, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_frames_land_together_on_sync() {
        let path = scratch("group_commit.wal");
        let events: Vec<Event> =
            (0..5).map(|i| booked(&format!("{:011}", 10_000_000_000u64 + i))).collect();

        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.buffer(e).unwrap();
        }
        assert_eq!(wal.records_since_snapshot(), 5);
        wal.sync().unwrap();
        drop(wal);

        assert_eq!(Wal::load(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
