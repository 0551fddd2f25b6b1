//! Draining a child's stdout and stderr.
//!
//! In [`PumpMode::Concurrent`] each stream gets its own scoped OS thread and
//! the caller only blocks on the final join. A child that fills one pipe
//! while the parent is blocked reading the other would otherwise stall both
//! sides forever. [`PumpMode::Sequential`] delivers stdout to EOF, then
//! stderr, without extra threads. For a child's pipes ([`pump_pipes`]) on
//! POSIX it still reads both descriptors as they become ready, holding stderr
//! back until stdout closes, so a flood on stderr cannot stall the child.
//! [`pump_streams`] in sequential mode reads the streams strictly one after
//! the other and is only safe for sources with no writer on the other end.
//!
//! The line callback runs on the pump thread that read the line. With two
//! streams it can be invoked from two threads at once, hence the `Sync`
//! bound. Callers that need to touch thread-affine state (a UI) must hand
//! the line off themselves.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{ChildStderr, ChildStdout};

use super::decoder::decode_line;

/// How the two streams of one process are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpMode {
    /// One thread per stream, joined before returning.
    #[default]
    Concurrent,
    /// stdout to EOF, then stderr to EOF, on the calling thread.
    Sequential,
}

impl PumpMode {
    pub fn from_nonblocking(nonblocking: bool) -> Self {
        if nonblocking {
            PumpMode::Concurrent
        } else {
            PumpMode::Sequential
        }
    }
}

/// Drain both streams to EOF, calling `on_line` for every decoded line.
///
/// Returns the accumulated text as `(stdout, stderr)`. Line order within one
/// stream is preserved; there is no ordering between the two streams.
pub fn pump_streams<O, E, F>(stdout: O, stderr: E, mode: PumpMode, on_line: &F) -> (String, String)
where
    O: Read + Send,
    E: Read + Send,
    F: Fn(&str) + Sync + ?Sized,
{
    match mode {
        PumpMode::Sequential => {
            let out = pump_stream(stdout, "stdout", on_line);
            let err = pump_stream(stderr, "stderr", on_line);
            (out, err)
        }
        PumpMode::Concurrent => std::thread::scope(|scope| {
            let out = scope.spawn(|| pump_stream(stdout, "stdout", on_line));
            let err = scope.spawn(|| pump_stream(stderr, "stderr", on_line));
            (join_pump(out), join_pump(err))
        }),
    }
}

/// Drain a child's stdout and stderr pipes.
pub fn pump_pipes<F>(
    stdout: ChildStdout,
    stderr: ChildStderr,
    mode: PumpMode,
    on_line: &F,
) -> (String, String)
where
    F: Fn(&str) + Sync + ?Sized,
{
    match mode {
        PumpMode::Concurrent => pump_streams(stdout, stderr, mode, on_line),
        #[cfg(unix)]
        PumpMode::Sequential => pump_polled(stdout, stderr, on_line),
        // Anonymous pipes cannot be polled on Windows.
        #[cfg(not(unix))]
        PumpMode::Sequential => pump_streams(stdout, stderr, PumpMode::Concurrent, on_line),
    }
}

/// Drain two descriptors on the calling thread.
///
/// Lines are delivered stdout first: stdout lines as they arrive, then every
/// stderr line once stdout reaches EOF. stderr is read throughout and held in
/// memory meanwhile, so the writer never blocks on a full stderr pipe.
#[cfg(unix)]
pub fn pump_polled<O, E, F>(mut stdout: O, mut stderr: E, on_line: &F) -> (String, String)
where
    O: Read + std::os::fd::AsFd,
    E: Read + std::os::fd::AsFd,
    F: Fn(&str) + ?Sized,
{
    use nix::errno::Errno;
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    let mut out = LineBuffer::default();
    let mut err = LineBuffer::default();
    let mut held_err = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut chunk = vec![0u8; 64 * 1024];

    while out_open || err_open {
        let (out_ready, err_ready) = {
            let mut fds = Vec::with_capacity(2);
            if out_open {
                fds.push(PollFd::new(stdout.as_fd(), PollFlags::POLLIN));
            }
            if err_open {
                fds.push(PollFd::new(stderr.as_fd(), PollFlags::POLLIN));
            }
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!("Polling child output failed: {}", e);
                    break;
                }
            }
            // POLLHUP and POLLERR count as ready: the read reports EOF or the error.
            let mut ready = fds.iter().map(|fd| fd.revents().is_some_and(|r| !r.is_empty()));
            let out_ready = out_open && ready.next().unwrap_or(false);
            let err_ready = err_open && ready.next().unwrap_or(false);
            (out_ready, err_ready)
        };

        if out_ready {
            match read_chunk(&mut stdout, &mut chunk, "stdout") {
                Some(n) => out.feed(&chunk[..n], on_line),
                None => {
                    out_open = false;
                    out.finish(on_line);
                    err.feed(&std::mem::take(&mut held_err), on_line);
                }
            }
        }

        if err_ready {
            match read_chunk(&mut stderr, &mut chunk, "stderr") {
                Some(n) if out_open => held_err.extend_from_slice(&chunk[..n]),
                Some(n) => err.feed(&chunk[..n], on_line),
                None => err_open = false,
            }
        }
    }

    out.finish(on_line);
    err.feed(&held_err, on_line);
    err.finish(on_line);
    (out.text, err.text)
}

/// One read, retried on interruption. `None` at EOF or on a read error.
#[cfg(unix)]
fn read_chunk(stream: &mut impl Read, buf: &mut [u8], name: &'static str) -> Option<usize> {
    loop {
        match stream.read(buf) {
            Ok(0) => return None,
            Ok(n) => return Some(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream = name, "Read error while pumping output: {}", e);
                return None;
            }
        }
    }
}

/// Splits raw chunks into decoded lines.
#[cfg(unix)]
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
    text: String,
}

#[cfg(unix)]
impl LineBuffer {
    fn feed<F: Fn(&str) + ?Sized>(&mut self, bytes: &[u8], on_line: &F) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos + 1;
            let line = decode_line(&self.pending[start..end]);
            on_line(&line);
            self.text.push_str(&line);
            start = end;
        }
        self.pending.drain(..start);
    }

    /// Emit an unterminated final line, if any.
    fn finish<F: Fn(&str) + ?Sized>(&mut self, on_line: &F) {
        if !self.pending.is_empty() {
            let line = decode_line(&self.pending);
            self.pending.clear();
            on_line(&line);
            self.text.push_str(&line);
        }
    }
}

fn join_pump(handle: std::thread::ScopedJoinHandle<'_, String>) -> String {
    match handle.join() {
        Ok(text) => text,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Read one stream line by line until a zero-length read.
pub fn pump_stream<R, F>(stream: R, name: &'static str, on_line: &F) -> String
where
    R: Read,
    F: Fn(&str) + ?Sized,
{
    let mut reader = BufReader::new(stream);
    let mut text = String::new();
    let mut raw = Vec::with_capacity(256);

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&raw);
                on_line(&line);
                text.push_str(&line);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream = name, "Read error while pumping output: {}", e);
                break;
            }
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[test]
    fn sequential_returns_both_streams() {
        let (out, err) = pump_streams(
            Cursor::new(b"one\r\ntwo\n".to_vec()),
            Cursor::new(b"\x1b[31mboom\x1b[0m\n".to_vec()),
            PumpMode::Sequential,
            &|_: &str| {},
        );
        assert_eq!(out, "one\ntwo\n");
        assert_eq!(err, "boom\n");
    }

    #[test]
    fn concurrent_calls_back_every_line() {
        let seen = Mutex::new(Vec::new());
        let (out, err) = pump_streams(
            Cursor::new(b"a\nb\nc\n".to_vec()),
            Cursor::new(b"x\ny\n".to_vec()),
            PumpMode::Concurrent,
            &|line: &str| seen.lock().unwrap().push(line.to_string()),
        );
        assert_eq!(out, "a\nb\nc\n");
        assert_eq!(err, "x\ny\n");

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 5);
        let stdout_lines: Vec<_> = seen.iter().filter(|l| ["a\n", "b\n", "c\n"].contains(&l.as_str())).collect();
        assert_eq!(stdout_lines, ["a\n", "b\n", "c\n"]);
    }

    #[test]
    fn empty_streams_yield_empty_text() {
        let (out, err) = pump_streams(
            Cursor::new(Vec::new()),
            Cursor::new(Vec::new()),
            PumpMode::Concurrent,
            &|_: &str| panic!("no lines expected"),
        );
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn polled_survives_stderr_flood_and_delivers_stdout_first() {
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let (out_rx, mut out_tx) = UnixStream::pair().unwrap();
        let (err_rx, mut err_tx) = UnixStream::pair().unwrap();
        let writer = std::thread::spawn(move || {
            let mut line = vec![b'x'; 99];
            line.push(b'\n');
            for _ in 0..20_000 {
                err_tx.write_all(&line).unwrap();
            }
            out_tx.write_all(b"done\npartial").unwrap();
        });

        let seen = Mutex::new(Vec::new());
        let (out, err) = pump_polled(out_rx, err_rx, &|line: &str| {
            seen.lock().unwrap().push(line.to_string())
        });
        writer.join().unwrap();

        assert_eq!(out, "done\npartial\n");
        assert_eq!(err.lines().count(), 20_000);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 20_002);
        assert_eq!(&seen[..2], ["done\n", "partial\n"]);
    }

    #[cfg(unix)]
    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::default();
        let seen = Mutex::new(Vec::new());
        let record = |line: &str| seen.lock().unwrap().push(line.to_string());
        buffer.feed(b"ab", &record);
        buffer.feed(b"c\r\nde", &record);
        buffer.feed(b"\nf", &record);
        buffer.finish(&record);
        assert_eq!(seen.into_inner().unwrap(), ["abc\n", "de\n", "f\n"]);
        assert_eq!(buffer.text, "abc\nde\nf\n");
    }

    #[test]
    fn mode_from_flag() {
        assert_eq!(PumpMode::from_nonblocking(true), PumpMode::Concurrent);
        assert_eq!(PumpMode::from_nonblocking(false), PumpMode::Sequential);
    }
}
