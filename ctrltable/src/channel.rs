//! The byte-level transport a [`crate::bus::Bus`] talks through.

use crate::ChannelError;
use log::trace;
use std::collections::VecDeque;
use std::time::Duration;

/// A half-duplex byte pipe to the servo bus.
pub trait ByteChannel {
    /// Writes all of `bytes` and waits until they have been handed to the transport.
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Reads up to `count` bytes, waiting at most `timeout` for each chunk.
    ///
    /// Returns fewer than `count` bytes if the timeout expires part way through, and
    /// [`ChannelError::Timeout`] if nothing arrived at all.
    fn read(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError>;
}

impl<T: ByteChannel + ?Sized> ByteChannel for &mut T {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        (**self).write(bytes)
    }

    fn read(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        (**self).read(count, timeout)
    }
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        (**self).write(bytes)
    }

    fn read(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        (**self).read(count, timeout)
    }
}

/// An in-memory bus, for simulations and tests.
///
/// Bytes queued with [`MemoryChannel::queue`] are handed out by `read` in order. With
/// `echo` set, everything written is also queued, like a half-duplex adapter that hears its
/// own transmissions. Replies scripted with [`MemoryChannel::reply_to_next_write`] are queued
/// after the echo of the write they answer.
#[derive(Clone, Debug, Default)]
pub struct MemoryChannel {
    /// Everything written so far.
    pub written: Vec<u8>,
    incoming: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    echo: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Queues bytes to be returned by later reads.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes);
    }

    /// Queues `bytes` to arrive once the next unanswered write has gone out.
    pub fn reply_to_next_write(&mut self, bytes: &[u8]) {
        self.replies.push_back(bytes.to_vec());
    }

    /// The number of queued bytes that nobody has read yet.
    pub fn unread(&self) -> usize {
        self.incoming.len()
    }
}

impl ByteChannel for MemoryChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.written.extend_from_slice(bytes);
        if self.echo {
            self.incoming.extend(bytes);
        }
        if let Some(reply) = self.replies.pop_front() {
            self.incoming.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, count: usize, _timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        if self.incoming.is_empty() && count > 0 {
            return Err(ChannelError::Timeout);
        }
        let count = count.min(self.incoming.len());
        let bytes: Vec<u8> = self.incoming.drain(..count).collect();
        trace!("Read {:02X?}", bytes);
        Ok(bytes)
    }
}

#[cfg(feature = "serial")]
pub use self::serial::SerialChannel;

#[cfg(feature = "serial")]
mod serial {
    use crate::ChannelError;
    use log::trace;
    use serialport::SerialPort;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// A [`ByteChannel`](super::ByteChannel) over a serial port, e.g. a USB half-duplex adapter.
    pub struct SerialChannel {
        port: Box<dyn SerialPort>,
    }

    impl SerialChannel {
        pub fn new(port: Box<dyn SerialPort>) -> Self {
            Self { port }
        }

        pub fn open(path: &str, baud_rate: u32) -> Result<Self, ChannelError> {
            let port = serialport::new(path, baud_rate)
                .open()
                .map_err(|e| ChannelError::Io(format!("opening {}: {}", path, e)))?;
            Ok(Self::new(port))
        }

        /// Another handle to the same port, so that reads and writes can happen from
        /// separate tasks.
        pub fn try_clone(&self) -> Result<Self, ChannelError> {
            let port = self
                .port
                .try_clone()
                .map_err(|e| ChannelError::Io(e.to_string()))?;
            Ok(Self::new(port))
        }
    }

    impl super::ByteChannel for SerialChannel {
        fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
            trace!("Writing {:02X?}", bytes);
            self.port.write_all(bytes).map_err(io_error)?;
            self.port.flush().map_err(io_error)
        }

        fn read(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
            self.port
                .set_timeout(timeout)
                .map_err(|e| ChannelError::Io(e.to_string()))?;
            let mut buffer = vec![0; count];
            let mut filled = 0;
            while filled < count {
                match self.port.read(&mut buffer[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(io_error(e)),
                }
            }
            if filled == 0 && count > 0 {
                return Err(ChannelError::Timeout);
            }
            buffer.truncate(filled);
            trace!("Read {:02X?}", buffer);
            Ok(buffer)
        }
    }

    fn io_error(error: io::Error) -> ChannelError {
        ChannelError::Io(error.to_string())
    }
}
