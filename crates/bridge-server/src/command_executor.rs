//! Command executor: runs a single shell command line under a deadline and
//! normalizes its output into a `ResponseEnvelope`.

use bridge_proto::{BridgeError, CellValue, ResponseEnvelope};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const COMMAND_DEADLINE: Duration = Duration::from_secs(30);

/// Splits on whitespace into argv, spawns under a 30s deadline, collects
/// combined stdout+stderr. Per spec.md §4.9:
/// - empty command → `EmptyCommand`
/// - nonzero exit → `{error: "command failed: ... Output: ..."}`
/// - empty output on success → a synthetic single row
pub async fn execute(line: &str) -> ResponseEnvelope {
    match execute_inner(line).await {
        Ok(resp) => resp,
        Err(e) => ResponseEnvelope::err(e.to_string()),
    }
}

async fn execute_inner(line: &str) -> Result<ResponseEnvelope, BridgeError> {
    let mut argv = line.split_whitespace();
    let program = argv.next().ok_or(BridgeError::EmptyCommand)?;
    let args: Vec<&str> = argv.collect();

    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BridgeError::SubprocessError(e.to_string()))?;

    let output = tokio::time::timeout(COMMAND_DEADLINE, child.wait_with_output())
        .await
        .map_err(|_| BridgeError::SubprocessError(format!("command timed out after {COMMAND_DEADLINE:?}")))?
        .map_err(|e| BridgeError::SubprocessError(e.to_string()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(BridgeError::SubprocessError(format!(
            "command failed: {} Output: {}",
            output.status, combined
        )));
    }

    let lines: Vec<&str> = combined.split('\n').collect();
    // `split('\n')` on a trailing newline yields one trailing empty string,
    // matching spec.md scenario 3's "trailing newline preserved as empty line".
    let lines: Vec<&str> = if combined.is_empty() { Vec::new() } else { lines };

    if lines.is_empty() {
        return Ok(ResponseEnvelope::single_column(
            "output",
            vec![CellValue::String(
                "(command executed successfully - no output)".to_string(),
            )],
        ));
    }

    Ok(ResponseEnvelope::single_column(
        "output",
        lines.into_iter().map(|l| CellValue::String(l.to_string())).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_hello_preserves_trailing_empty_line() {
        let resp = execute("echo hello").await;
        assert_eq!(resp.error, "");
        assert_eq!(resp.columns, vec!["output"]);
        assert_eq!(
            resp.rows,
            vec![vec![CellValue::String("hello".to_string())], vec![CellValue::String(String::new())]]
        );
    }

    #[tokio::test]
    async fn empty_command_is_an_error() {
        let resp = execute("   ").await;
        assert!(resp.error.contains("empty command"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_as_error() {
        let resp = execute("false").await;
        assert!(resp.error.contains("command failed"));
    }

    #[tokio::test]
    async fn no_output_gets_synthetic_row() {
        let resp = execute("true").await;
        assert_eq!(resp.error, "");
        assert_eq!(
            resp.rows,
            vec![vec![CellValue::String(
                "(command executed successfully - no output)".to_string()
            )]]
        );
    }
}
