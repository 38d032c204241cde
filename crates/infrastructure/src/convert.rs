//! `qemu-img` process wrapper.
//!
//! Runs `qemu-img convert -p`, parses the percentage the tool prints on
//! its progress line, and enforces a fixed overall timeout. Timeout or
//! cancellation kills the process tree.

use aldatu_application::ports::{ConvertError, DiskConverter};
use aldatu_application::progress::ProgressSender;
use aldatu_domain::DiskFormat;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct QemuImgConverter {
    binary: String,
    timeout: Duration,
    progress_pattern: Regex,
}

impl QemuImgConverter {
    pub fn new() -> Self {
        Self::with_binary("qemu-img")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_TIMEOUT,
            // the tool prints "(12.34/100%)"; any number on the line is
            // the percentage
            progress_pattern: Regex::new(r"(\d+\.?\d*)").expect("static pattern"),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(
        &self,
        args: &[&str],
        progress: Option<&ProgressSender>,
        cancel: &CancellationToken,
    ) -> Result<(i32, String, String), ConvertError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError::Io(format!("failed to spawn {}: {e}", self.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConvertError::Io("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConvertError::Io("failed to capture stderr".to_string()))?;

        // -p rewrites the progress line with carriage returns, so split
        // on both delimiters
        let mut stdout_reader = FramedRead::new(
            stdout,
            AnyDelimiterCodec::new(vec![b'\r', b'\n'], vec![b'\n']),
        );
        let mut stderr_reader = FramedRead::new(
            stderr,
            AnyDelimiterCodec::new(vec![b'\r', b'\n'], vec![b'\n']),
        );

        let mut stdout_buffer = String::new();
        let mut stderr_buffer = String::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            if stdout_done && stderr_done {
                break;
            }

            tokio::select! {
                chunk = stdout_reader.next(), if !stdout_done => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            let line = String::from_utf8_lossy(&bytes).to_string();
                            if let Some(progress) = progress {
                                if let Some(captures) = self.progress_pattern.captures(&line) {
                                    if let Ok(pct) = captures[1].parse::<f64>() {
                                        progress.report(pct.clamp(0.0, 100.0) as u8).await;
                                    }
                                }
                            }
                            stdout_buffer.push_str(&line);
                            stdout_buffer.push('\n');
                        }
                        Some(Err(e)) => {
                            warn!(%e, "error reading converter stdout");
                            stdout_done = true;
                        }
                        None => stdout_done = true,
                    }
                }
                chunk = stderr_reader.next(), if !stderr_done => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            stderr_buffer.push_str(&String::from_utf8_lossy(&bytes));
                            stderr_buffer.push('\n');
                        }
                        Some(Err(e)) => {
                            warn!(%e, "error reading converter stderr");
                            stderr_done = true;
                        }
                        None => stderr_done = true,
                    }
                }
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ConvertError::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(timeout_secs = self.timeout.as_secs(), "converter timed out, killing process");
                    let _ = child.kill().await;
                    return Err(ConvertError::Timeout { seconds: self.timeout.as_secs() });
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ConvertError::Io(format!("failed to wait for converter: {e}")))?;
        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, "converter finished");

        Ok((exit_code, stdout_buffer, stderr_buffer))
    }
}

impl Default for QemuImgConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiskConverter for QemuImgConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target_format: DiskFormat,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        let input = input.to_string_lossy().to_string();
        let output = output.to_string_lossy().to_string();
        let args = [
            "convert",
            "-p",
            "-O",
            target_format.as_str(),
            input.as_str(),
            output.as_str(),
        ];

        let (exit_code, _, stderr) = self.run(&args, Some(progress), cancel).await?;
        if exit_code != 0 {
            return Err(ConvertError::CommandFailed {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }
        progress.report(100).await;
        Ok(())
    }

    async fn inspect(&self, path: &Path) -> Result<String, ConvertError> {
        let path = path.to_string_lossy().to_string();
        let args = ["info", "--output=json", path.as_str()];

        let cancel = CancellationToken::new();
        let (exit_code, stdout, stderr) = self.run(&args, None, &cancel).await?;
        if exit_code != 0 {
            return Err(ConvertError::CommandFailed {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_pattern_extracts_percentage() {
        let converter = QemuImgConverter::new();
        let captures = converter
            .progress_pattern
            .captures("    (42.50/100%)")
            .unwrap();
        assert_eq!(&captures[1], "42.50");
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let converter = QemuImgConverter::with_binary("definitely-not-qemu-img");
        let cancel = CancellationToken::new();
        let (progress, _rx) = ProgressSender::channel(4);

        let err = converter
            .convert(
                Path::new("/tmp/in.img"),
                Path::new("/tmp/out.qcow2"),
                DiskFormat::Qcow2,
                &progress,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Io(_)));
    }

    #[tokio::test]
    async fn shell_stub_reports_progress_and_succeeds() {
        // use a shell as a stand-in binary printing tool-like output
        let converter = QemuImgConverter::with_binary("sh");
        let cancel = CancellationToken::new();
        let (progress, mut rx) = ProgressSender::channel(16);

        // DiskConverter::convert builds qemu-img args; call run directly
        let (exit_code, stdout, _) = converter
            .run(
                &["-c", "printf '(25.00/100%%)\\r(100.00/100%%)\\n'"],
                Some(&progress),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(exit_code, 0);
        assert!(stdout.contains("25.00"));

        let mut seen = Vec::new();
        while let Ok(v) = rx.try_recv() {
            seen.push(v);
        }
        assert_eq!(seen, vec![25, 100]);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let converter =
            QemuImgConverter::with_binary("sleep").with_timeout(Duration::from_millis(100));
        let cancel = CancellationToken::new();

        let err = converter.run(&["5"], None, &cancel).await.unwrap_err();
        assert!(matches!(err, ConvertError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let converter = QemuImgConverter::with_binary("sleep");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = converter.run(&["5"], None, &cancel).await.unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }
}
