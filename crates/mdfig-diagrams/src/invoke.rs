//! External renderer invocation.
//!
//! [`MermaidCli`] runs the mermaid command line renderer (`mmdc`) once per
//! diagram:
//!
//! 1. The diagram source is written to `diagram.mmd` in a fresh temporary
//!    directory, together with files capturing the renderer's stdout/stderr.
//! 2. The renderer is spawned with `-i <input> -o <destination>` and flags
//!    mapped from [`RenderOptions`].
//! 3. The child is polled until it exits or the timeout expires. On timeout
//!    it is killed and reaped before the failure is returned. On unix the
//!    renderer runs in its own process group and the whole group is killed,
//!    which takes down the browser processes `mmdc` starts.
//! 4. A zero exit status only counts as success when the destination file
//!    exists and is non-empty.
//!
//! The temporary directory and the child process are both owned by scope
//! guards, so every exit path (success, failure, timeout, panic) removes the
//! input file and leaves no running process behind.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::consts::{DEFAULT_TIMEOUT, INPUT_FILENAME};
use crate::error::ConfigurationError;
use crate::options::RenderOptions;

/// Longest stderr excerpt kept in a failure.
const MAX_STDERR_LEN: usize = 4096;

/// Outcome of one render call: the image bytes, or why there are none.
///
/// Failures are values. A renderer never panics or aborts the caller because
/// one diagram is broken.
pub type RenderResult = Result<Vec<u8>, RenderFailure>;

/// Why a render produced no image.
#[derive(Debug, thiserror::Error)]
pub enum RenderFailure {
    /// The renderer program could not be started.
    #[error("failed to start renderer '{program}': {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The renderer exited unsuccessfully.
    #[error("renderer exited with {status}: {stderr}")]
    ExitStatus {
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Captured stderr (possibly truncated).
        stderr: String,
    },
    /// The renderer did not finish in time and was killed.
    #[error("renderer timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        /// Configured limit.
        timeout: Duration,
    },
    /// The renderer reported success but wrote nothing.
    #[error("renderer produced no output at {}", .path.display())]
    EmptyOutput {
        /// Expected output path.
        path: PathBuf,
    },
    /// Preparing input or reading output failed.
    #[error("I/O error during render: {0}")]
    Io(#[from] io::Error),
}

/// Turns diagram source into an image file.
///
/// Implementations must be thread-safe: pages of a build are processed in
/// parallel and share one renderer.
pub trait Renderer: Send + Sync {
    /// Render `code` with `options` into `destination`.
    ///
    /// `destination` carries the extension of `options.format`. On success
    /// the file exists, is non-empty, and its contents are returned.
    fn render(&self, code: &str, options: &RenderOptions, destination: &Path) -> RenderResult;
}

/// Renderer backed by the mermaid command line tool.
#[derive(Debug, Clone)]
pub struct MermaidCli {
    /// Program followed by leading arguments (e.g. `["npx", "-y", "@mermaid-js/mermaid-cli"]`).
    command: Vec<String>,
    timeout: Duration,
}

impl MermaidCli {
    /// Create a renderer running `command`.
    ///
    /// The program is looked up on `PATH` (or checked directly when it is a
    /// path) so a missing renderer fails here instead of on every diagram.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyCommand`] if `command` has no program
    /// and [`ConfigurationError::RendererNotFound`] if it cannot be executed.
    pub fn new(command: Vec<String>) -> Result<Self, ConfigurationError> {
        let Some(program) = command.first().filter(|p| !p.is_empty()) else {
            return Err(ConfigurationError::EmptyCommand);
        };
        if let Err(e) = which::which(program) {
            tracing::debug!(program = %program, error = %e, "renderer lookup failed");
            return Err(ConfigurationError::RendererNotFound {
                program: program.clone(),
            });
        }
        Ok(Self {
            command,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the maximum wall-clock time per render.
    ///
    /// Default is 30 seconds.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renderer arguments for one invocation (after the command's own leading arguments).
    fn build_args(input: &Path, output: &Path, options: &RenderOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(20);
        let mut flag = |name: &str, value: OsString| {
            args.push(name.into());
            args.push(value);
        };

        flag("-i", input.into());
        flag("-o", output.into());
        if options.theme != "default" {
            flag("-t", options.theme.clone().into());
        }
        flag("-b", options.background_color.clone().into());
        flag("-w", options.width.to_string().into());
        flag("-H", options.height.to_string().into());
        flag("-s", options.scale.to_string().into());
        if let Some(path) = &options.css_file {
            flag("-C", path.into());
        }
        if let Some(path) = &options.puppeteer_config {
            flag("-p", path.into());
        }
        if let Some(path) = &options.mermaid_config {
            flag("-c", path.into());
        }

        args
    }
}

impl Renderer for MermaidCli {
    fn render(&self, code: &str, options: &RenderOptions, destination: &Path) -> RenderResult {
        let scratch = tempfile::TempDir::new()?;
        let input = scratch.path().join(INPUT_FILENAME);
        fs::write(&input, code)?;
        let stdout_path = scratch.path().join("stdout.log");
        let stderr_path = scratch.path().join("stderr.log");

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty renderer command"))?;

        let mut command = Command::new(program);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let child = command
            .args(leading)
            .args(Self::build_args(&input, destination, options))
            .stdin(Stdio::null())
            .stdout(File::create(&stdout_path)?)
            .stderr(File::create(&stderr_path)?)
            .spawn()
            .map_err(|source| RenderFailure::Spawn {
                program: program.clone(),
                source,
            })?;

        let started = Instant::now();
        let mut guard = ChildGuard(child);
        let Some(status) = wait_with_timeout(&mut guard.0, self.timeout)? else {
            guard.terminate();
            tracing::warn!(
                program = %program,
                timeout_secs = self.timeout.as_secs_f64(),
                "renderer timed out, process killed"
            );
            return Err(RenderFailure::Timeout {
                timeout: self.timeout,
            });
        };
        tracing::debug!(
            program = %program,
            %status,
            elapsed_ms = started.elapsed().as_millis(),
            "renderer finished"
        );

        if !status.success() {
            return Err(RenderFailure::ExitStatus {
                status,
                stderr: read_excerpt(&stderr_path),
            });
        }

        match fs::read(destination) {
            Ok(image) if !image.is_empty() => Ok(image),
            Ok(_) => Err(RenderFailure::EmptyOutput {
                path: destination.to_path_buf(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RenderFailure::EmptyOutput {
                path: destination.to_path_buf(),
            }),
            Err(e) => Err(RenderFailure::Io(e)),
        }
    }
}

/// Owns a child process and kills it if still running when dropped.
///
/// On unix the child leads its own process group, and the whole group is
/// killed.
struct ChildGuard(Child);

impl ChildGuard {
    /// Kill the child (and its process group) and reap it.
    fn terminate(&mut self) {
        #[cfg(unix)]
        kill_process_group(&self.0);
        if let Err(e) = self.0.kill() {
            tracing::debug!(error = %e, "failed to kill renderer process");
        }
        if let Err(e) = self.0.wait() {
            tracing::debug!(error = %e, "failed to reap renderer process");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if matches!(self.0.try_wait(), Ok(None)) {
            self.terminate();
        }
    }
}

/// Send `SIGKILL` to the process group led by `child`.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group id is the child's pid,
    // which stays reserved until the child is reaped below.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result != 0 {
        tracing::debug!(
            error = %io::Error::last_os_error(),
            "failed to kill renderer process group"
        );
    }
}

/// Wait for `child` to exit, giving up after `timeout`.
///
/// Returns `None` when the deadline passes with the child still running.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    const MAX_POLL: Duration = Duration::from_millis(100);

    let deadline = Instant::now() + timeout;
    let mut poll = Duration::from_millis(5);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll.min(deadline - now));
        poll = (poll * 2).min(MAX_POLL);
    }
}

/// Read a captured output file as trimmed, length-limited text.
fn read_excerpt(path: &Path) -> String {
    let bytes = fs::read(path).unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();
    if text.len() <= MAX_STDERR_LEN {
        return text.to_owned();
    }
    let mut end = MAX_STDERR_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_new_rejects_empty_command() {
        assert_eq!(
            MermaidCli::new(Vec::new()).unwrap_err(),
            ConfigurationError::EmptyCommand
        );
        assert_eq!(
            MermaidCli::new(vec![String::new()]).unwrap_err(),
            ConfigurationError::EmptyCommand
        );
    }

    #[test]
    fn test_build_args_defaults() {
        let args = MermaidCli::build_args(
            Path::new("/tmp/in.mmd"),
            Path::new("/out/x.png"),
            &RenderOptions::default(),
        );

        assert_eq!(
            args_as_strings(&args),
            vec![
                "-i", "/tmp/in.mmd", "-o", "/out/x.png", "-b", "white", "-w", "800", "-H", "600",
                "-s", "1",
            ]
        );
    }

    #[test]
    fn test_build_args_all_options() {
        let options = RenderOptions {
            theme: "dark".to_owned(),
            background_color: "transparent".to_owned(),
            width: 1200,
            height: 900,
            scale: 2.5,
            css_file: Some("/cfg/style.css".into()),
            puppeteer_config: Some("/cfg/puppeteer.json".into()),
            mermaid_config: Some("/cfg/mermaid.json".into()),
            ..RenderOptions::default()
        };
        let args = MermaidCli::build_args(Path::new("in.mmd"), Path::new("out.svg"), &options);

        assert_eq!(
            args_as_strings(&args),
            vec![
                "-i",
                "in.mmd",
                "-o",
                "out.svg",
                "-t",
                "dark",
                "-b",
                "transparent",
                "-w",
                "1200",
                "-H",
                "900",
                "-s",
                "2.5",
                "-C",
                "/cfg/style.css",
                "-p",
                "/cfg/puppeteer.json",
                "-c",
                "/cfg/mermaid.json",
            ]
        );
    }

    #[test]
    fn test_read_excerpt_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stderr.log");
        fs::write(&path, "é".repeat(MAX_STDERR_LEN)).unwrap();

        let excerpt = read_excerpt(&path);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.len() <= MAX_STDERR_LEN + 3);
    }

    #[test]
    fn test_read_excerpt_missing_file() {
        assert_eq!(read_excerpt(Path::new("/nonexistent/stderr.log")), "");
    }

    #[test]
    fn test_new_rejects_missing_program() {
        assert_eq!(
            MermaidCli::new(vec!["/nonexistent/mdfig-renderer".to_owned()]).unwrap_err(),
            ConfigurationError::RendererNotFound {
                program: "/nonexistent/mdfig-renderer".to_owned(),
            }
        );
        assert!(matches!(
            MermaidCli::new(vec!["mdfig-no-such-renderer-on-path".to_owned(), "-y".to_owned()]),
            Err(ConfigurationError::RendererNotFound { .. })
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::os::unix::fs::PermissionsExt;

        /// Renderer running a shell script through `sh`.
        ///
        /// The script records its arguments in `args.txt` next to itself, then
        /// sets `$input` and `$output` before running `body`.
        fn script_renderer(dir: &Path, body: &str) -> MermaidCli {
            let script = dir.join("renderer.sh");
            fs::write(
                &script,
                format!(
                    "#!/bin/sh\n\
                     echo \"$@\" > \"$(dirname \"$0\")/args.txt\"\n\
                     while [ $# -gt 0 ]; do\n\
                       case \"$1\" in\n\
                         -i) input=\"$2\"; shift ;;\n\
                         -o) output=\"$2\"; shift ;;\n\
                       esac\n\
                       shift\n\
                     done\n\
                     {body}\n"
                ),
            )
            .unwrap();
            MermaidCli::new(vec!["sh".to_owned(), script.to_string_lossy().into_owned()]).unwrap()
        }

        #[test]
        fn test_render_success() {
            let tmp = tempfile::tempdir().unwrap();
            let renderer = script_renderer(tmp.path(), r#"cat "$input" > "$output""#);
            let destination = tmp.path().join("nested/out.png");

            let image = renderer
                .render("graph TD\nA --> B", &RenderOptions::default(), &destination)
                .unwrap();

            assert_eq!(image, b"graph TD\nA --> B");
            assert_eq!(fs::read(&destination).unwrap(), b"graph TD\nA --> B");
        }

        #[test]
        fn test_render_passes_flags() {
            let tmp = tempfile::tempdir().unwrap();
            let renderer = script_renderer(tmp.path(), r#"echo ok > "$output""#);
            let options = RenderOptions {
                theme: "forest".to_owned(),
                ..RenderOptions::default()
            };

            renderer
                .render("A", &options, &tmp.path().join("out.svg"))
                .unwrap();

            let args = fs::read_to_string(tmp.path().join("args.txt")).unwrap();
            assert!(args.contains("-t forest"), "{args}");
            assert!(args.contains("-w 800 -H 600"), "{args}");
            assert!(args.contains(INPUT_FILENAME), "{args}");
            assert!(args.contains("out.svg"), "{args}");
        }

        #[test]
        fn test_render_nonzero_exit_captures_stderr() {
            let tmp = tempfile::tempdir().unwrap();
            let renderer = script_renderer(
                tmp.path(),
                "echo 'Parse error on line 2' >&2\nexit 3",
            );

            let result = renderer.render("graph ???", &RenderOptions::default(), &tmp.path().join("out.png"));

            match result {
                Err(RenderFailure::ExitStatus { status, stderr }) => {
                    assert_eq!(status.code(), Some(3));
                    assert_eq!(stderr, "Parse error on line 2");
                }
                other => panic!("Expected ExitStatus failure, got {other:?}"),
            }
        }

        #[test]
        fn test_render_exit_zero_without_output() {
            let tmp = tempfile::tempdir().unwrap();
            let renderer = script_renderer(tmp.path(), "exit 0");

            let result = renderer.render("A", &RenderOptions::default(), &tmp.path().join("out.png"));

            assert!(matches!(result, Err(RenderFailure::EmptyOutput { .. })), "{result:?}");
        }

        #[test]
        fn test_render_exit_zero_with_empty_file() {
            let tmp = tempfile::tempdir().unwrap();
            let renderer = script_renderer(tmp.path(), r#": > "$output""#);

            let result = renderer.render("A", &RenderOptions::default(), &tmp.path().join("out.png"));

            assert!(matches!(result, Err(RenderFailure::EmptyOutput { .. })), "{result:?}");
        }

        #[test]
        fn test_render_timeout_kills_process() {
            let tmp = tempfile::tempdir().unwrap();
            let marker = tmp.path().join("finished");
            let renderer = script_renderer(
                tmp.path(),
                &format!("sleep 5\ntouch '{}'", marker.display()),
            )
            .timeout(Duration::from_millis(200));

            let started = Instant::now();
            let result = renderer.render("A", &RenderOptions::default(), &tmp.path().join("out.png"));

            assert!(matches!(result, Err(RenderFailure::Timeout { .. })), "{result:?}");
            assert!(started.elapsed() < Duration::from_secs(4));
            // The killed script never reaches its last line
            std::thread::sleep(Duration::from_millis(300));
            assert!(!marker.exists());
        }

        #[test]
        fn test_render_spawn_failure() {
            let tmp = tempfile::tempdir().unwrap();
            let program = tmp.path().join("mmdc");
            fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
            let renderer = MermaidCli::new(vec![program.to_string_lossy().into_owned()]).unwrap();
            // Program disappears between configuration and rendering
            fs::remove_file(&program).unwrap();

            let result = renderer.render("A", &RenderOptions::default(), &tmp.path().join("out.png"));

            assert!(matches!(result, Err(RenderFailure::Spawn { .. })), "{result:?}");
        }

        #[test]
        fn test_render_timeout_kills_background_children() {
            let tmp = tempfile::tempdir().unwrap();
            let pid_file = tmp.path().join("child.pid");
            let renderer = script_renderer(
                tmp.path(),
                &format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display()),
            )
            .timeout(Duration::from_millis(300));

            let result = renderer.render("A", &RenderOptions::default(), &tmp.path().join("out.png"));
            assert!(matches!(result, Err(RenderFailure::Timeout { .. })), "{result:?}");

            let pid: libc::pid_t = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
            // The killed child may linger as a zombie until init reaps it
            let deadline = Instant::now() + Duration::from_secs(2);
            let mut alive = true;
            while alive && Instant::now() < deadline {
                alive = process_running(pid);
                std::thread::sleep(Duration::from_millis(20));
            }
            assert!(!alive, "background child {pid} survived the timeout");
        }

        /// Whether `pid` exists and is not a zombie.
        fn process_running(pid: libc::pid_t) -> bool {
            // SAFETY: signal 0 only checks that the process exists
            if unsafe { libc::kill(pid, 0) } != 0 {
                return false;
            }
            fs::read_to_string(format!("/proc/{pid}/stat"))
                .map_or(true, |stat| !stat.contains(") Z "))
        }

        #[test]
        fn test_render_removes_temporary_input() {
            let tmp = tempfile::tempdir().unwrap();
            let record = tmp.path().join("input-path.txt");
            let renderer = script_renderer(
                tmp.path(),
                &format!(r#"echo "$input" > '{}'; echo img > "$output""#, record.display()),
            );

            renderer
                .render("A", &RenderOptions::default(), &tmp.path().join("out.png"))
                .unwrap();

            let input = fs::read_to_string(&record).unwrap();
            assert!(!Path::new(input.trim()).exists());
        }
    }
}
