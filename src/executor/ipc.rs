//! Newline-delimited JSON framing over pipes.
//!
//! Both ends of the supervisor/subordinate link speak one JSON document per
//! line. Reads and writes go straight to the file descriptor and retry on
//! `EINTR`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Buffer size for the framed streams. Feature lists for large APKs can run
/// to a few hundred KiB on one line.
const BUFFER_SIZE: usize = 64 * 1024;

/// An owned pipe end with `EINTR`-retrying `Read`/`Write`.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Stdin of the current process.
    pub fn stdin() -> io::Result<Self> {
        Self::dup_of(io::stdin().as_fd())
    }

    /// Stdout of the current process.
    pub fn stdout() -> io::Result<Self> {
        Self::dup_of(io::stdout().as_fd())
    }

    fn dup_of(fd: BorrowedFd<'_>) -> io::Result<Self> {
        Ok(Self {
            fd: fd.try_clone_to_owned()?,
        })
    }
}

impl From<OwnedFd> for PipeFd {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads one JSON message per line.
pub struct MessageReader {
    reader: BufReader<PipeFd>,
    line: String,
}

impl MessageReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line: String::with_capacity(4096),
        }
    }

    /// Read the next raw line without its terminator. `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let trimmed = self.line.trim_end_matches(['\n', '\r']).len();
        self.line.truncate(trimmed);
        Ok(Some(&self.line))
    }

    /// Read and decode the next message. `None` on EOF.
    ///
    /// A line that does not decode is reported as `InvalidData` so callers
    /// can tell a garbled peer apart from a closed one.
    pub fn read_message<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        match self.read_line()? {
            None => Ok(None),
            Some(line) => serde_json::from_str(line)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }

    /// Block until the peer closes its end, discarding anything it sends.
    pub fn drain_to_eof(&mut self) -> io::Result<()> {
        let mut sink = [0u8; 512];
        while self.reader.read(&mut sink)? > 0 {}
        Ok(())
    }
}

/// Writes one JSON message per line, flushing after each.
pub struct MessageWriter {
    writer: BufWriter<PipeFd>,
}

impl MessageWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, fd),
        }
    }

    pub fn write_message<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Write raw bytes and flush.
    #[cfg(test)]
    pub fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        body: String,
    }

    fn create_pipe() -> (PipeFd, PipeFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
        (PipeFd::from(read_fd), PipeFd::from(write_fd))
    }

    #[test]
    fn test_message_framing() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = MessageReader::new(read_fd);
        let mut writer = MessageWriter::new(write_fd);

        writer
            .write_message(&Ping {
                seq: 1,
                body: "multi\nline".into(),
            })
            .unwrap();
        writer
            .write_message(&Ping {
                seq: 2,
                body: String::new(),
            })
            .unwrap();
        drop(writer);

        let first: Ping = reader.read_message().unwrap().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.body, "multi\nline");
        let second: Ping = reader.read_message().unwrap().unwrap();
        assert_eq!(second.seq, 2);
        assert!(reader.read_message::<Ping>().unwrap().is_none());
    }

    #[test]
    fn test_garbage_line_is_invalid_data() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = MessageReader::new(read_fd);
        let mut writer = MessageWriter::new(write_fd);

        writer.write_raw(b"not json\r\n").unwrap();
        drop(writer);

        let err = reader.read_message::<Ping>().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_drain_to_eof_returns_when_writer_closes() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = MessageReader::new(read_fd);
        let mut writer = MessageWriter::new(write_fd);

        writer.write_raw(b"leftover\n").unwrap();
        drop(writer);

        reader.drain_to_eof().unwrap();
        assert!(reader.read_line().unwrap().is_none());
    }
}
