//! Stdout writes for the control plane.
//!
//! - **stdout**: control messages, one JSON document per line
//! - **stderr**: logs (never parsed by the gateway)
//!
//! Never use `println!` for control lines; it may emit `\r\n` on Windows.

use std::io::{self, Write};

/// Write `line` followed by a single `\n` and flush.
pub fn write_stdout_line(line: &str) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_line(&mut handle, line)
}

/// Serialize `value` as JSON and write it as one stdout line.
pub fn write_stdout_json<T: serde::Serialize>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string(value).map_err(io::Error::from)?;
    write_stdout_line(&json)
}

fn write_line<W: Write>(out: &mut W, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_ends_with_single_newline() {
        let mut out = Vec::new();
        write_line(&mut out, r#"{"method":"$ready"}"#).unwrap();
        assert_eq!(out, b"{\"method\":\"$ready\"}\n");
    }

    #[test]
    fn test_write_stdout_json_serializes() {
        #[derive(serde::Serialize)]
        struct Probe {
            value: i32,
        }
        assert!(write_stdout_json(&Probe { value: 42 }).is_ok());
    }
}
