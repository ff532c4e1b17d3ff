// Line-oriented transport for the sensor array

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::discovery::discover_device;
use super::LineSensorError;

/// Longest line kept while waiting for a terminator
const MAX_LINE_LEN: usize = 256;

/// Source of newline-terminated frames
pub trait FrameSource: Send {
    /// Block for at most the read timeout.
    /// Returns Ok(None) when no complete line arrived in time.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Opens a fresh frame source, once per connection attempt
pub trait Connector: Send {
    fn connect(&mut self) -> Result<Box<dyn FrameSource>, LineSensorError>;
}

/// Serial port settings for the sensor array
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Fixed device path. Discovery is skipped when set.
    pub device: Option<PathBuf>,
    pub discovery_dir: PathBuf,
    pub device_keyword: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SerialConnector {
    fn connect(&mut self) -> Result<Box<dyn FrameSource>, LineSensorError> {
        let settings = &self.settings;
        let path = match &settings.device {
            Some(path) => path.clone(),
            None => discover_device(&settings.discovery_dir, &settings.device_keyword)
                .ok_or_else(|| LineSensorError::NoDevice(settings.discovery_dir.clone()))?,
        };
        debug!("Port name: {}", path.display());

        let port = serialport::new(path.to_string_lossy().into_owned(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;

        // Drop whatever queued up while disconnected
        port.clear(ClearBuffer::Input)?;

        info!(
            "Opened line sensor on {} at {} baud",
            path.display(),
            settings.baud_rate
        );
        Ok(Box::new(SerialFrameSource::new(port)))
    }
}

/// Splits a byte stream into lines, one buffer fill per call
///
/// Each `read_line` returns after at most one read from the underlying
/// stream, so a link that never sends a terminator still hands control back
/// to the caller. Partial lines longer than `MAX_LINE_LEN` are dropped.
pub struct SerialFrameSource<R = Box<dyn SerialPort>> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> SerialFrameSource<R> {
    pub fn new(port: R) -> Self {
        Self {
            reader: BufReader::with_capacity(MAX_LINE_LEN, port),
            pending: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_owned();
        self.pending.clear();
        line
    }
}

impl<R: Read + Send> FrameSource for SerialFrameSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let available = match self.reader.fill_buf() {
            Ok(available) => available,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(None);
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        self.pending.extend_from_slice(&available[..used]);
        self.reader.consume(used);

        if complete {
            return Ok(Some(self.take_line()));
        }
        // Partial line stays buffered for the next call
        if self.pending.len() > MAX_LINE_LEN {
            debug!("Discarding {} bytes without terminator", self.pending.len());
            self.pending.clear();
        }
        Ok(None)
    }
}


#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Byte stream delivered in fixed chunks, then an endless run of one byte
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
        fill: Option<u8>,
    }

    impl ChunkedReader {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                fill: None,
            }
        }

        fn noise(byte: u8) -> Self {
            Self {
                chunks: VecDeque::new(),
                fill: Some(byte),
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(chunk) = self.chunks.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk[n..].to_vec());
                }
                return Ok(n);
            }
            match self.fill {
                Some(byte) => {
                    buf.fill(byte);
                    Ok(buf.len())
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    fn read_all(source: &mut SerialFrameSource<ChunkedReader>, calls: usize) -> Vec<String> {
        (0..calls)
            .filter_map(|_| source.read_line().unwrap())
            .collect()
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut source = SerialFrameSource::new(ChunkedReader::new(&[
            b"l: 0001, c: ",
            b"0002, r: 0003\r\nl: 0004",
            b", c: 0005, r: 0006\n",
        ]));
        assert_eq!(
            read_all(&mut source, 10),
            vec!["l: 0001, c: 0002, r: 0003", "l: 0004, c: 0005, r: 0006"]
        );
    }

    #[test]
    fn test_timeout_is_no_line() {
        let mut source = SerialFrameSource::new(ChunkedReader::new(&[b"l: 00"]));
        assert_eq!(source.read_line().unwrap(), None);
        assert_eq!(source.read_line().unwrap(), None);
        assert_eq!(source.pending, b"l: 00");
    }

    #[test]
    fn test_unterminated_stream_returns_each_call() {
        let mut source = SerialFrameSource::new(ChunkedReader::noise(b'x'));
        for _ in 0..1000 {
            assert_eq!(source.read_line().unwrap(), None);
            assert!(source.pending.len() <= MAX_LINE_LEN);
        }
    }

    #[test]
    fn test_recovers_after_overlong_garbage() {
        let garbage = vec![b'#'; MAX_LINE_LEN * 3];
        let mut source = SerialFrameSource::new(ChunkedReader::new(&[
            &garbage,
            b"\nl: 0100, c: 0200, r: 0300\n",
        ]));
        let lines = read_all(&mut source, 20);
        assert_eq!(lines.last().map(String::as_str), Some("l: 0100, c: 0200, r: 0300"));
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_LEN + 1));
    }
}
