//! Launching a tool process and wiring its pipes.
//!
//! stdout is handed to the caller as an [`OutputStream`] as soon as the
//! process starts; stderr is drained by a background task into a bounded
//! [`DiagnosticBuffer`] that is only read back when the run fails.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::{escape, Error, Result};

/// Upper bound on retained stderr text per process.
pub const DIAGNOSTIC_LIMIT: usize = 64 * 1024;

/// How long to wait for the stderr reader after the process has exited.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What to do with the child's standard output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    /// Pipe it and expose it as an [`OutputStream`].
    Stream,
    /// Discard it.
    Discard,
}

/// Short display name for a program path.
pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

/// Line-oriented stderr capture that keeps the most recent `limit` bytes.
///
/// `[...]` is prepended to the rendered text once anything was dropped.
#[derive(Debug)]
pub struct DiagnosticBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
    truncated: bool,
}

impl DiagnosticBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            truncated: false,
        }
    }

    /// Append one line. A line longer than the limit keeps only its head.
    pub fn push_line(&mut self, mut line: String) {
        let max_line = self.limit.saturating_sub(1);
        if line.len() > max_line {
            let mut end = max_line;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
            self.truncated = true;
        }
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.limit && self.lines.len() > 1 {
            if let Some(old) = self.lines.pop_front() {
                self.bytes -= old.len() + 1;
                self.truncated = true;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render the retained lines, newline-terminated.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.bytes + 8);
        if self.truncated {
            out.push_str("[...]\n");
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// The child's standard output, owned by the caller.
#[derive(Debug)]
pub struct OutputStream {
    inner: ChildStdout,
}

impl OutputStream {
    pub fn into_inner(self) -> ChildStdout {
        self.inner
    }
}

impl AsyncRead for OutputStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// One live tool process.
#[derive(Debug)]
pub struct ProcessHandle {
    tool: String,
    child: Child,
    pid: Option<u32>,
    output: Option<OutputStream>,
    diagnostics: Arc<Mutex<DiagnosticBuffer>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn `program` with `args`.
    ///
    /// stdin is closed, stderr is always captured. The child is killed if
    /// the handle is dropped while it is still running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the operating system refuses to start
    /// the process.
    pub fn spawn(program: &Path, args: &[String], stdout: StdoutMode) -> Result<Self> {
        let tool = tool_name(program);

        let mut cmd = Command::new(program);
        push_args(&mut cmd, args);
        cmd.stdin(Stdio::null());
        cmd.stdout(match stdout {
            StdoutMode::Stream => Stdio::piped(),
            StdoutMode::Discard => Stdio::null(),
        });
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::launch(tool.clone(), e))?;
        let pid = child.id();

        let output = child.stdout.take().map(|inner| OutputStream { inner });
        let diagnostics = Arc::new(Mutex::new(DiagnosticBuffer::new(DIAGNOSTIC_LIMIT)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, Arc::clone(&diagnostics))));

        Ok(Self {
            tool,
            child,
            pid,
            output,
            diagnostics,
            stderr_task,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// OS process id, if the process was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the stdout stream. Returns `None` after the first call or when
    /// stdout was discarded.
    pub fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send a kill signal without waiting for the exit.
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Captured stderr text. Waits briefly for the reader to reach EOF so
    /// the tail of the output is not lost.
    pub async fn diagnostics(&mut self) -> String {
        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_GRACE, &mut task).await.is_err() {
                task.abort();
                tracing::debug!("{}: stderr still open after exit; using partial output", self.tool);
            }
        }
        self.diagnostics.lock().to_text()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(windows)]
fn push_args(cmd: &mut Command, args: &[String]) {
    for arg in args {
        cmd.raw_arg(&*escape::quote_arg(arg));
    }
}

#[cfg(not(windows))]
fn push_args(cmd: &mut Command, args: &[String]) {
    cmd.args(args);
    tracing::trace!("argv: {}", escape::join_args(args));
}

/// Splits raw stderr bytes into lines. `\r`, `\n` and `\r\n` all end a
/// line, so ffmpeg's carriage-return progress updates are separate lines.
/// Bytes past `max_line` within one line are dropped.
#[derive(Debug)]
struct LineSplitter {
    pending: Vec<u8>,
    max_line: usize,
    after_cr: bool,
}

impl LineSplitter {
    fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            after_cr: false,
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' | b'\n' => {
                    lines.push(self.take_line());
                    self.after_cr = b == b'\r';
                }
                _ => {
                    self.after_cr = false;
                    if self.pending.len() < self.max_line {
                        self.pending.push(b);
                    }
                }
            }
        }
        lines
    }

    /// The unterminated tail, if any.
    fn finish(mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| self.take_line())
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

async fn collect_stderr(stderr: ChildStderr, sink: Arc<Mutex<DiagnosticBuffer>>) {
    let mut reader = BufReader::new(stderr);
    let mut splitter = LineSplitter::new(DIAGNOSTIC_LIMIT);
    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("stderr read error: {e}");
                break;
            }
        };
        let consumed = chunk.len();
        let lines = splitter.feed(chunk);
        reader.consume(consumed);

        if !lines.is_empty() {
            let mut buffer = sink.lock();
            for line in lines {
                buffer.push_line(line);
            }
        }
    }
    if let Some(tail) = splitter.finish() {
        sink.lock().push_line(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tool_name_uses_file_name() {
        assert_eq!(tool_name(Path::new("/usr/bin/ffmpeg")), "ffmpeg");
        assert_eq!(tool_name(Path::new("ffmpeg")), "ffmpeg");
    }

    #[test]
    fn diagnostic_buffer_keeps_recent_lines() {
        let mut buf = DiagnosticBuffer::new(14);
        assert!(buf.is_empty());
        buf.push_line("first".into());
        buf.push_line("second".into());
        assert_eq!(buf.to_text(), "first\nsecond\n");

        buf.push_line("third".into());
        assert_eq!(buf.to_text(), "[...]\nsecond\nthird\n");
    }

    #[test]
    fn diagnostic_buffer_caps_oversized_line() {
        let mut buf = DiagnosticBuffer::new(5);
        buf.push_line("a very long line".into());
        assert_eq!(buf.to_text(), "[...]\na ve\n");

        // Never splits a multi-byte character.
        let mut buf = DiagnosticBuffer::new(4);
        buf.push_line("ab\u{e9}".into());
        assert_eq!(buf.to_text(), "[...]\nab\n");
    }

    #[test]
    fn splitter_breaks_on_cr_lf_and_crlf() {
        let mut splitter = LineSplitter::new(64);
        let lines = splitter.feed(b"frame=1\rframe=2\rInput #0\r\nStream #0:0\n\nerr");
        assert_eq!(lines, ["frame=1", "frame=2", "Input #0", "Stream #0:0", ""]);
        assert_eq!(splitter.finish().as_deref(), Some("err"));
    }

    #[test]
    fn splitter_joins_crlf_across_chunks() {
        let mut splitter = LineSplitter::new(64);
        assert_eq!(splitter.feed(b"one\r"), ["one"]);
        assert!(splitter.feed(b"\ntwo").is_empty());
        assert_eq!(splitter.feed(b"\n"), ["two"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_caps_line_length() {
        let mut splitter = LineSplitter::new(3);
        assert_eq!(splitter.feed(b"abcdef\nxy\n"), ["abc", "xy"]);
    }

    #[tokio::test]
    async fn spawn_missing_program_is_launch_error() {
        let result = ProcessHandle::spawn(
            &PathBuf::from("nonexistent_tool_xyz_12345"),
            &[],
            StdoutMode::Discard,
        );
        assert!(matches!(result, Err(Error::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_streams_and_stderr_is_captured() {
        use tokio::io::AsyncReadExt;

        let args = vec![
            "-c".to_string(),
            "printf 'payload'; echo 'warning: one' >&2; echo 'warning: two' >&2".to_string(),
        ];
        let mut handle =
            ProcessHandle::spawn(Path::new("/bin/sh"), &args, StdoutMode::Stream).unwrap();
        assert!(handle.pid().is_some());

        let mut output = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());
        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"payload");

        let status = handle.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(handle.diagnostics().await, "warning: one\nwarning: two\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn carriage_return_progress_stays_bounded() {
        let script = r"i=0
while [ $i -lt 4000 ]; do
  printf 'frame=%5d fps=25 q=28.0 size=  1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.0x\r' $i >&2
  i=$((i+1))
done
echo fatal >&2
exit 1";
        let args = vec!["-c".to_string(), script.to_string()];
        let mut handle =
            ProcessHandle::spawn(Path::new("/bin/sh"), &args, StdoutMode::Discard).unwrap();

        let status = handle.wait().await.unwrap();
        assert_eq!(status.code(), Some(1));

        let text = handle.diagnostics().await;
        assert!(text.len() <= DIAGNOSTIC_LIMIT + "[...]\n".len(), "{}", text.len());
        assert!(text.starts_with("[...]\n"));
        assert!(text.ends_with("frame= 3999 fps=25 q=28.0 size=  1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.0x\nfatal\n"));
        assert!(text.lines().count() > 100);
    }
}
