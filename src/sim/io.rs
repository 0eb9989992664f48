//! IO handling for the simulator.
//!
//! Host-facing output is split into three append-only streams, bundled in
//! [`Console`]:
//! - `message`: human-readable progress (banners, traces)
//! - `profile`: end-of-run statistics
//! - `panic`: fatal diagnostics
//!
//! Each stream is a swappable [`Sink`], so embedders and tests can capture
//! output into shared buffers instead of the process's stdio.
//!
//! Guest-facing IO (what the program under simulation reads and writes
//! through the libc routines) goes through [`Device`], which pairs an input
//! queue with an output sink and counts the bytes moved.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

/// An append-only output stream.
#[derive(Debug, Clone)]
pub enum Sink {
    /// The process's stdout.
    Stdout,
    /// The process's stderr.
    Stderr,
    /// Discard all output.
    Null,
    /// Append to a shared buffer (used by tests and embedders).
    Buffer(Arc<Mutex<Vec<u8>>>),
}
impl Sink {
    /// Creates a buffer sink, returning it along with a handle to the
    /// shared buffer it appends to.
    pub fn buffer() -> (Sink, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Sink::Buffer(Arc::clone(&buf)), buf)
    }

    /// Appends raw bytes to the stream.
    ///
    /// Host IO failures are not guest-visible and are ignored.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        match self {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(bytes);
                let _ = out.flush();
            },
            Sink::Stderr => {
                let _ = std::io::stderr().lock().write_all(bytes);
            },
            Sink::Null => {},
            Sink::Buffer(buf) => {
                let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
                guard.extend_from_slice(bytes);
            },
        }
    }
}
impl std::fmt::Write for Sink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}
impl Default for Sink {
    fn default() -> Self {
        Sink::Stdout
    }
}

/// The three host-facing output streams.
#[derive(Debug, Clone)]
pub struct Console {
    /// Human-readable progress output.
    pub message: Sink,
    /// End-of-run statistics.
    pub profile: Sink,
    /// Fatal diagnostics.
    pub panic: Sink,
}
impl Default for Console {
    /// `message` and `profile` go to stdout, `panic` to stderr.
    fn default() -> Self {
        Console {
            message: Sink::Stdout,
            profile: Sink::Stdout,
            panic: Sink::Stderr,
        }
    }
}

/// The source the guest reads from.
#[derive(Debug)]
pub enum Input {
    /// The process's stdin.
    Stdio,
    /// A byte queue (used by tests and embedders).
    Buffer(VecDeque<u8>),
}

/// The guest's IO device: an input queue and an output sink.
///
/// All guest IO performed by the libc routines flows through here, so
/// swapping the backing [`Input`]/[`Sink`] redirects the whole program.
///
/// # Example
/// ```
/// use rv32_ensemble::sim::io::{Device, Input, Sink};
///
/// let (out, buf) = Sink::buffer();
/// let mut dev = Device::new(Input::Buffer(b"hi".iter().copied().collect()), out);
///
/// assert_eq!(dev.read_byte(), Some(b'h'));
/// dev.write_byte(b'!');
/// assert_eq!(buf.lock().unwrap().as_slice(), b"!");
/// ```
#[derive(Debug)]
pub struct Device {
    input: Input,
    output: Sink,
    bytes_read: u64,
    bytes_written: u64,
    /// A byte taken from input but pushed back (scanf lookahead).
    pushed_back: Option<u8>,
}
impl Device {
    /// Creates a device over the given input and output.
    pub fn new(input: Input, output: Sink) -> Self {
        Device {
            input,
            output,
            bytes_read: 0,
            bytes_written: 0,
            pushed_back: None,
        }
    }

    /// Reads one byte from the guest's input, or `None` at end of input.
    pub fn read_byte(&mut self) -> Option<u8> {
        if let Some(b) = self.pushed_back.take() {
            return Some(b);
        }
        let byte = match &mut self.input {
            Input::Stdio => {
                let mut buf = [0u8; 1];
                match std::io::stdin().lock().read(&mut buf) {
                    Ok(1) => Some(buf[0]),
                    _ => None,
                }
            },
            Input::Buffer(queue) => queue.pop_front(),
        };
        if byte.is_some() {
            self.bytes_read += 1;
        }
        byte
    }

    /// Returns a byte to the input queue, to be read again next.
    ///
    /// Only one byte of push-back is held at a time.
    pub fn unread_byte(&mut self, byte: u8) {
        debug_assert!(self.pushed_back.is_none(), "only one byte of push-back is supported");
        self.pushed_back = Some(byte);
    }

    /// Writes one byte to the guest's output.
    pub fn write_byte(&mut self, byte: u8) {
        self.write_bytes(&[byte]);
    }

    /// Writes bytes to the guest's output.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.output.write_bytes(bytes);
        self.bytes_written += bytes.len() as u64;
    }

    /// Writes the end-of-run IO summary to the given sink.
    pub fn print_details(&self, verbose: bool, out: &mut Sink) {
        use std::fmt::Write;

        let _ = writeln!(out, "Device: read {} bytes, wrote {} bytes", self.bytes_read, self.bytes_written);
        if verbose {
            let backend = match self.input {
                Input::Stdio => "stdin",
                Input::Buffer(_) => "buffer",
            };
            let _ = writeln!(out, "  input backend: {backend}");
        }
    }
}
impl Default for Device {
    /// A device over the process's stdin/stdout.
    fn default() -> Self {
        Device::new(Input::Stdio, Sink::Stdout)
    }
}
