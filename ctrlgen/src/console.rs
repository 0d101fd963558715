//! An interactive console for poking at a half-duplex bus by hand.
//!
//! Lines typed on stdin are parsed as hex bytes and written to the port. Everything that comes
//! back is printed, with our own echoed bytes in parentheses so that device replies stand out.

use ctrltable::channel::{ByteChannel, SerialChannel};
use ctrltable::echo::{EchoFilter, Incoming};
use ctrltable::ChannelError;
use eyre::{Report, WrapErr};
use log::{debug, error};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::io::{stdin, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime;
use tokio::task::{spawn_blocking, spawn_local, LocalSet};

const READ_CHUNK: usize = 64;

/// Parses a line like `FF FF 01 02 01 FB` or `0xff,0xff`.
pub fn parse_hex_line(line: &str) -> Result<Vec<u8>, Report> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16).wrap_err_with(|| format!("Invalid byte `{}`", token))
        })
        .collect()
}

fn format_incoming(bytes: &[u8], filter: &mut EchoFilter) -> String {
    bytes
        .iter()
        .map(|&byte| match filter.classify(byte) {
            Incoming::Echo(byte) => format!("({:02X})", byte),
            Incoming::Reply(byte) => format!("{:02X}", byte),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_quit(line: &str) -> bool {
    matches!(line, "q" | "quit")
}

/// Runs the console until the user quits, stdin is closed or the port fails.
pub fn run(channel: SerialChannel, poll_timeout: Duration) -> Result<(), Report> {
    let runtime = runtime::Builder::new_current_thread()
        .build()
        .wrap_err("Creating runtime")?;
    let reader_channel = channel.try_clone()?;
    let input = BufReader::new(stdin());
    let local = LocalSet::new();
    let result = local.block_on(
        &runtime,
        session(channel, reader_channel, input, poll_timeout),
    );
    drop(local);
    // Stdin is read on a blocking thread, which may still be waiting for a line.
    runtime.shutdown_background();
    result
}

/// Runs one writer and one reader task until either of them stops. Must be called within a
/// [`LocalSet`].
async fn session<W, R, I>(
    writer_channel: W,
    reader_channel: R,
    input: I,
    poll_timeout: Duration,
) -> Result<(), Report>
where
    W: ByteChannel + 'static,
    R: ByteChannel + Send + 'static,
    I: AsyncBufRead + Unpin + 'static,
{
    let filter = Rc::new(RefCell::new(EchoFilter::new()));
    let quit = Rc::new(Cell::new(false));

    let mut writer = spawn_local(write_lines(
        writer_channel,
        input,
        filter.clone(),
        quit.clone(),
    ));
    let mut reader = spawn_local(print_incoming(reader_channel, filter, quit, poll_timeout));
    tokio::select! {
        written = &mut writer => {
            let written = written?;
            reader.await??;
            written
        }
        read = &mut reader => {
            if let Err(e) = read? {
                error!("Reading from the bus failed: {}", e);
                writer.abort();
                return Err(e);
            }
            writer.await?
        }
    }
}

async fn write_lines<C: ByteChannel, I: AsyncBufRead + Unpin>(
    channel: C,
    input: I,
    filter: Rc<RefCell<EchoFilter>>,
    quit: Rc<Cell<bool>>,
) -> Result<(), Report> {
    let result = forward_lines(channel, input, &filter).await;
    // Whatever happened, the reader has to stop too.
    quit.set(true);
    result
}

async fn forward_lines<C: ByteChannel, I: AsyncBufRead + Unpin>(
    mut channel: C,
    input: I,
    filter: &RefCell<EchoFilter>,
) -> Result<(), Report> {
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_quit(line) {
            break;
        }
        let bytes = match parse_hex_line(line) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("{}", e);
                continue;
            }
        };
        filter.borrow_mut().record_sent(&bytes);
        channel.write(&bytes)?;
        println!("> {:02X?}", bytes);
    }
    debug!("Stopped reading input");
    Ok(())
}

async fn print_incoming<C: ByteChannel + Send + 'static>(
    mut channel: C,
    filter: Rc<RefCell<EchoFilter>>,
    quit: Rc<Cell<bool>>,
    poll_timeout: Duration,
) -> Result<(), Report> {
    while !quit.get() {
        let (returned, result) = spawn_blocking(move || {
            let result = channel.read(READ_CHUNK, poll_timeout);
            (channel, result)
        })
        .await?;
        channel = returned;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(ChannelError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };
        println!("< {}", format_incoming(&bytes, &mut filter.borrow_mut()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrltable::channel::MemoryChannel;
    use test_case::test_case;
    use tokio::io::duplex;

    const POLL_TIMEOUT: Duration = Duration::from_millis(1);

    /// Keeps everything written where the test can still see it.
    struct Recorder(Rc<RefCell<Vec<u8>>>);

    impl ByteChannel for Recorder {
        fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
            self.0.borrow_mut().extend_from_slice(bytes);
            Ok(())
        }

        fn read(&mut self, _count: usize, _timeout: Duration) -> Result<Vec<u8>, ChannelError> {
            Err(ChannelError::Timeout)
        }
    }

    struct Unplugged;

    impl ByteChannel for Unplugged {
        fn write(&mut self, _bytes: &[u8]) -> Result<(), ChannelError> {
            Ok(())
        }

        fn read(&mut self, _count: usize, _timeout: Duration) -> Result<Vec<u8>, ChannelError> {
            Err(ChannelError::Io("device unplugged".to_string()))
        }
    }

    fn run_local<F: std::future::Future>(future: F) -> F::Output {
        let runtime = runtime::Builder::new_current_thread().build().unwrap();
        LocalSet::new().block_on(&runtime, future)
    }

    #[test]
    fn quit_ends_the_session() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let input = BufReader::new(&b"FF FF 01\nnot hex\n\nq\n02\n"[..]);
        let result = run_local(session(
            Recorder(written.clone()),
            MemoryChannel::new(),
            input,
            POLL_TIMEOUT,
        ));
        assert!(result.is_ok());
        assert_eq!(*written.borrow(), [0xFF, 0xFF, 0x01]);
    }

    #[test]
    fn end_of_input_ends_the_session() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let input = BufReader::new(&b"0x01 0x02"[..]);
        let result = run_local(session(
            Recorder(written.clone()),
            MemoryChannel::new(),
            input,
            POLL_TIMEOUT,
        ));
        assert!(result.is_ok());
        assert_eq!(*written.borrow(), [0x01, 0x02]);
    }

    #[test]
    fn reader_failure_ends_the_session_while_input_is_idle() {
        // Nothing is ever typed, but the other end stays open.
        let (_keyboard, input) = duplex(64);
        let written = Rc::new(RefCell::new(Vec::new()));
        let result = run_local(session(
            Recorder(written),
            Unplugged,
            BufReader::new(input),
            POLL_TIMEOUT,
        ));
        let error = result.unwrap_err();
        assert_eq!(
            error.downcast_ref::<ChannelError>(),
            Some(&ChannelError::Io("device unplugged".to_string()))
        );
    }

    #[test_case("FF FF 01 02 01 FB", &[0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB])]
    #[test_case("0xff,0xfd, 0x00", &[0xFF, 0xFD, 0x00])]
    #[test_case("  7 ", &[0x07])]
    #[test_case("", &[])]
    fn parses_hex(line: &str, expected: &[u8]) {
        assert_eq!(parse_hex_line(line).unwrap(), expected);
    }

    #[test_case("FG")]
    #[test_case("100")]
    #[test_case("0x")]
    fn rejects_bad_bytes(line: &str) {
        assert!(parse_hex_line(line).is_err());
    }

    #[test]
    fn echo_is_bracketed() {
        let mut filter = EchoFilter::new();
        filter.record_sent(&[0xFF, 0xFF, 0x01]);
        assert_eq!(format_incoming(&[0xFF, 0xFF], &mut filter), "(FF) (FF)");
        assert_eq!(
            format_incoming(&[0x01, 0xFF, 0xFF, 0x01], &mut filter),
            "(01) FF FF 01"
        );
    }

    #[test_case("q", true)]
    #[test_case("quit", true)]
    #[test_case("FF", false)]
    fn quitting(line: &str, expected: bool) {
        assert_eq!(is_quit(line), expected);
    }
}
