//! Same-host transport: one fixed-size message slot in a file-backed shared
//! memory segment, guarded by an in-segment lock word and published through a
//! monotonically increasing version counter.
//!
//! Writers take the lock, overwrite the slot, and bump the version. Readers
//! never take the lock: they watch the version and copy the fields when it
//! moves, re-checking the version after the copy to discard a read that raced
//! a concurrent publish. A writer that starts between the copy and the
//! re-check can still, in principle, be observed mid-write; the slot update
//! under the lock is the unit of consistency and that residual window is
//! accepted. The slot is not a queue: two publishes between two polls means
//! the earlier message is lost, last write wins.

use std::{
    cell::UnsafeCell,
    env,
    fs::{File, OpenOptions},
    hint, io, mem,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    ptr,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{io::AsyncBufReadExt, select};
use tracing::warn;

use crate::{
    cli::MailboxArgs,
    client::write_stdout,
    message::{BODY_MAX, Message, SENDER_MAX},
};

/// Size of the shared segment; the compatibility surface with other
/// implementations of the same mailbox.
pub const SEGMENT_SIZE: usize = 1024;
/// Fixed reader poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// The slot layout inside the segment. All processes mapping the same file
/// agree on this; the byte arrays are NUL-terminated and only ever mutated
/// while `lock` is held.
#[repr(C)]
struct RawSlot {
    lock: AtomicU32,
    _pad: u32,
    version: AtomicU64,
    sender: UnsafeCell<[u8; SENDER_MAX + 1]>,
    body: UnsafeCell<[u8; BODY_MAX + 1]>,
}

const _: () = assert!(mem::size_of::<RawSlot>() <= SEGMENT_SIZE);

/// A mapped mailbox segment. Opening creates the backing file on first use;
/// a fresh file is zero-filled, which is exactly the initial slot state
/// (version 0, lock free). The file is not removed on drop, so the segment
/// outlives any one participant.
pub struct Mailbox {
    ptr: *mut u8,
    len: usize,
    // Kept open to maintain the mapping.
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

// SAFETY: the mapping lives as long as the Mailbox, the slot header is
// atomics, and the byte arrays are mutated only under the in-segment lock.
// Concurrent lock-free reads are mediated by the version re-check in `poll`.
unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    /// Open or create the segment at `path` and map it shared. Failure here
    /// is fatal to this participant's mailbox usage.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() < SEGMENT_SIZE as u64 {
            file.set_len(SEGMENT_SIZE as u64)?;
        }

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                SEGMENT_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len: SEGMENT_SIZE,
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current slot version; 0 until the first publish.
    pub fn version(&self) -> u64 {
        self.slot().version.load(Ordering::Acquire)
    }

    /// Publish a message: take the lock, overwrite both fields with
    /// truncation to their declared capacities, bump the version, release.
    pub fn publish(&self, sender: &str, body: &str) {
        let slot = self.slot();
        acquire(&slot.lock);
        store_text(slot.sender.get() as *mut u8, SENDER_MAX + 1, sender);
        store_text(slot.body.get() as *mut u8, BODY_MAX + 1, body);
        slot.version.fetch_add(1, Ordering::Release);
        slot.lock.store(UNLOCKED, Ordering::Release);
    }

    fn slot(&self) -> &RawSlot {
        // SAFETY: the mapping is valid for self's lifetime and at least
        // SEGMENT_SIZE bytes; the compile-time assertion above guarantees the
        // slot fits.
        unsafe { &*(self.ptr as *const RawSlot) }
    }

    fn read_fields(&self) -> Message {
        let slot = self.slot();
        let sender = read_text(slot.sender.get() as *const u8, SENDER_MAX + 1);
        let body = read_text(slot.body.get() as *const u8, BODY_MAX + 1);
        Message::new(&sender, &body)
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap in `open`.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// Spin until the lock word is ours. Blocking with no timeout, as in the
/// original design: a holder that never releases starves every writer.
fn acquire(lock: &AtomicU32) {
    let mut spins: u32 = 0;
    while lock
        .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        spins = spins.wrapping_add(1);
        if spins % 64 == 0 {
            thread::yield_now();
        } else {
            hint::spin_loop();
        }
    }
}

/// Bounded copy into a slot field: at most `cap - 1` payload bytes, the rest
/// zeroed so the field stays NUL-terminated and carries no stale tail.
fn store_text(dst: *mut u8, cap: usize, text: &str) {
    let n = text.len().min(cap - 1);
    // SAFETY: dst points at a field of exactly `cap` bytes inside the mapped
    // slot, and n < cap.
    unsafe {
        ptr::copy_nonoverlapping(text.as_ptr(), dst, n);
        ptr::write_bytes(dst.add(n), 0, cap - n);
    }
}

fn read_text(src: *const u8, cap: usize) -> String {
    let mut buf = vec![0u8; cap];
    // SAFETY: src points at a field of exactly `cap` bytes inside the mapped
    // slot.
    unsafe {
        ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), cap);
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(cap);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// A polling reader over one mailbox. Attaching captures the segment's
/// current version, so history published before the attach is never replayed.
pub struct MailboxReader {
    mailbox: Arc<Mailbox>,
    last_seen: u64,
}

impl MailboxReader {
    pub fn attach(mailbox: Arc<Mailbox>) -> Self {
        let last_seen = mailbox.version();
        Self { mailbox, last_seen }
    }

    /// Lock-free check for a new message. Returns the latest slot contents if
    /// the version moved since the last observation, `None` otherwise.
    /// Intermediate publishes are never delivered.
    pub fn poll(&mut self) -> Option<Message> {
        let slot = self.mailbox.slot();
        loop {
            let observed = slot.version.load(Ordering::Acquire);
            if observed <= self.last_seen {
                return None;
            }
            let message = self.mailbox.read_fields();
            if slot.version.load(Ordering::Acquire) == observed {
                self.last_seen = observed;
                return Some(message);
            }
            // A publish landed mid-copy; go again and take the newer slot.
        }
    }
}

/// Default segment path when the CLI does not name one. Every participant on
/// the host that uses the default ends up in the same chat.
pub fn default_segment_path() -> PathBuf {
    env::temp_dir().join("chat-relay-mailbox.shm")
}

/// Terminal front end for the mailbox path: a 100 ms poll loop multiplexed
/// with stdin, skipping messages this participant published itself.
pub async fn run(args: MailboxArgs) -> Result<()> {
    let path = args.segment.clone().unwrap_or_else(default_segment_path);
    let mailbox = Arc::new(Mailbox::open(&path).with_context(|| {
        format!("failed to open mailbox segment {}", path.display())
    })?);
    let mut reader = MailboxReader::attach(Arc::clone(&mailbox));

    write_stdout(&format!(
        "*** mailbox chat ({}) via {}",
        args.name,
        path.display()
    ))
    .await?;

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if let Some(message) = reader.poll() {
                    if message.sender != args.name {
                        write_stdout(&message.to_string()).await?;
                    }
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read? == 0 {
                    break;
                }
                let text = input.trim_end();
                if text.is_empty() {
                    continue;
                }
                if text.eq_ignore_ascii_case("/quit") {
                    write_stdout("*** leaving chat").await?;
                    break;
                }
                mailbox.publish(&args.name, text);
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_text_truncates_and_terminates() {
        let mut field = [0xffu8; 8];
        store_text(field.as_mut_ptr(), field.len(), "abcdefghij");
        assert_eq!(&field[..7], b"abcdefg");
        assert_eq!(field[7], 0);
    }

    #[test]
    fn store_text_zeroes_stale_tail() {
        let mut field = [0xffu8; 8];
        store_text(field.as_mut_ptr(), field.len(), "hi");
        assert_eq!(&field[..2], b"hi");
        assert!(field[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_text_stops_at_terminator() {
        let field = *b"abc\0leftover";
        assert_eq!(read_text(field.as_ptr(), field.len()), "abc");
    }
}
