use anyhow::Context;
use bstr::ByteSlice;
use std::process::Output;
use tokio::process::Command;

use crate::slice::SliceResult;

pub fn create_command<S: AsRef<str>>(arguments: &[S]) -> Command {
    let mut command = Command::new(arguments[0].as_ref());
    command.args(arguments[1..].iter().map(|arg| arg.as_ref()));
    command.kill_on_drop(true);
    command
}

pub fn check_command_output(output: Output) -> SliceResult<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

/// Runs the given program, checks that it has succeeded and returns its (trimmed) stdout.
pub async fn run_command<S: AsRef<str>>(arguments: &[S]) -> SliceResult<String> {
    let program = arguments[0].as_ref();
    log::debug!(
        "Running command `{}`",
        arguments
            .iter()
            .map(|arg| arg.as_ref())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = create_command(arguments)
        .output()
        .await
        .with_context(|| format!("{program} start failed"))?;
    let output =
        check_command_output(output).with_context(|| format!("{program} execution failed"))?;
    let output = output
        .stdout
        .to_str()
        .map_err(|e| anyhow::anyhow!("Invalid UTF-8 {} output: {:?}", program, e))?
        .trim()
        .to_string();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use crate::slice::command::run_command;

    #[tokio::test]
    async fn run_command_returns_trimmed_stdout() {
        let output = run_command(&["echo", "  slice-0  "]).await.unwrap();
        assert_eq!(output, "slice-0");
    }

    #[tokio::test]
    async fn run_command_reports_exit_code() {
        let error = run_command(&["sh", "-c", "echo broken >&2; exit 3"])
            .await
            .unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("sh execution failed"));
        assert!(message.contains("Exit code: 3"));
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn run_command_passes_arguments_verbatim() {
        let dir = tempfile::TempDir::with_prefix("mslice").unwrap();
        let script = dir.path().join("fake-cli.sh");
        std::fs::write(&script, "printf '%s|' \"$@\"\n").unwrap();

        let script = script.to_str().unwrap();
        let output = run_command(&["sh", script, "--flag=a b", "--", "x"])
            .await
            .unwrap();
        assert_eq!(output, "--flag=a b|--|x|");
    }
}
