//! Stdio I/O for the control plane.
//!
//! - **stdout** carries exactly one JSON line, the `$init` announcement
//! - **stderr** carries logs
//!
//! Never use `println!` in a worker: anything else on stdout before the
//! `$init` line makes the application reject the worker.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{KioError, Result};

/// Write a line to stdout followed by a single `\n`, then flush.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Read one control line from a worker's stdout.
///
/// Fails with `ConnectionClosed` if the worker exits first and with
/// `Protocol` if nothing arrives within `timeout`.
pub async fn read_control_line<R>(reader: &mut R, timeout: Duration) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| KioError::Protocol(format!("no $init line within {:?}", timeout)))??;
    if read == 0 {
        return Err(KioError::ConnectionClosed);
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_write_stdout_line_does_not_panic() {
        assert!(write_stdout_line(r#"{"test": true}"#).is_ok());
    }

    #[tokio::test]
    async fn test_read_control_line() {
        let data: &[u8] = b"{\"method\":\"$init\"}\nrest";
        let mut reader = BufReader::new(data);

        let line = read_control_line(&mut reader, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "{\"method\":\"$init\"}\n");
    }

    #[tokio::test]
    async fn test_read_control_line_eof() {
        let data: &[u8] = b"";
        let mut reader = BufReader::new(data);

        let err = read_control_line(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, KioError::ConnectionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_control_line_timeout() {
        let (_keep_open, rx) = tokio::io::duplex(64);
        let mut reader = BufReader::new(rx);

        let err = read_control_line(&mut reader, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, KioError::Protocol(_)));
    }
}
