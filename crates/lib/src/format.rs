//! Response formatting: turn an execution result into the single reply text.
//!
//! Output selection: stdout wins; stderr is shown only when stdout is empty; when
//! the selection is blank the placeholder `[No output]` is used. Everything is
//! wrapped in one fenced block as "```\n{output}\n```" with the output unmodified,
//! so replies match the long-standing bridge format exactly. Formatting is pure so
//! the same inputs always give the same bytes.

use std::path::Path;
use std::time::Duration;

use crate::channels::InboundEvent;
use crate::config::{ReplyConfig, ReplyMode};
use crate::exec::ExecutionResult;

pub const NO_OUTPUT_PLACEHOLDER: &str = "[No output]";
pub const LAUNCH_ERROR_PREFIX: &str = "Error executing command: ";
pub const UNKNOWN_USER: &str = "unknown_user";

const FENCE: &str = "```";

/// Local identity shown in prompt mode: `user@host:path$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub user: String,
    pub host: String,
    /// Working directory as displayed, home abbreviated to `~`.
    pub path: String,
}

impl PromptContext {
    /// Detect user, host and working directory of this process. Commands run in
    /// `working_dir` when set, so that is the directory shown.
    pub fn detect(working_dir: Option<&Path>) -> Self {
        let cwd = working_dir
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok());
        let home = dirs::home_dir();
        let path = match cwd {
            Some(cwd) => display_path(&cwd, home.as_deref()),
            None => "?".to_string(),
        };
        Self {
            user: local_user_name(),
            host: local_host_name(),
            path,
        }
    }

    pub fn prompt_line(&self, command_text: &str) -> String {
        format!("{}@{}:{}$ {}", self.user, self.host, self.path, command_text)
    }
}

/// Abbreviate `home` (and anything under it) to `~`.
pub fn display_path(path: &Path, home: Option<&Path>) -> String {
    if let Some(home) = home.filter(|h| !h.as_os_str().is_empty()) {
        if let Ok(rest) = path.strip_prefix(home) {
            return if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            };
        }
    }
    path.display().to_string()
}

#[cfg(unix)]
fn local_user_name() -> String {
    use nix::unistd::{Uid, User};
    match User::from_uid(Uid::current()) {
        Ok(Some(user)) => user.name,
        Ok(None) => env_user_name(),
        Err(e) => {
            log::debug!("passwd lookup failed: {}", e);
            env_user_name()
        }
    }
}

#[cfg(not(unix))]
fn local_user_name() -> String {
    env_user_name()
}

fn env_user_name() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "user".to_string())
}

#[cfg(unix)]
fn local_host_name() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            log::debug!("gethostname failed: {}", e);
            env_host_name()
        }
    }
}

#[cfg(not(unix))]
fn local_host_name() -> String {
    env_host_name()
}

fn env_host_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// stdout if non-empty, otherwise stderr; blank selections become the placeholder.
pub fn select_output<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    let chosen = if stdout.is_empty() { stderr } else { stdout };
    if chosen.trim().is_empty() {
        NO_OUTPUT_PLACEHOLDER
    } else {
        chosen
    }
}

/// Keep the last `max_chars` characters, marking how many were dropped.
fn truncate_to_tail(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if max_chars == 0 || char_count <= max_chars {
        return s.to_string();
    }
    let skip = char_count - max_chars;
    let tail: String = s.chars().skip(skip).collect();
    format!("[truncated {} chars]...{}", skip, tail)
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Builds reply bodies for one presentation mode.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    options: ReplyConfig,
    prompt: Option<PromptContext>,
}

impl ResponseFormatter {
    /// `prompt` is used only in prompt mode.
    pub fn new(options: ReplyConfig, prompt: Option<PromptContext>) -> Self {
        Self { options, prompt }
    }

    /// Detects the prompt context when the mode needs it.
    pub fn from_config(options: &ReplyConfig, working_dir: Option<&Path>) -> Self {
        let prompt = match options.mode {
            ReplyMode::Prompt => Some(PromptContext::detect(working_dir)),
            ReplyMode::Plain => None,
        };
        Self::new(options.clone(), prompt)
    }

    /// Whether the dispatcher should look up the requester's display name.
    pub fn wants_author(&self) -> bool {
        self.options.mode == ReplyMode::Prompt && self.options.show_author
    }

    /// The text shown inside the block, before any prompt line. Output is kept
    /// byte for byte, trailing newline included, so `echo hello` renders as
    /// "```\nhello\n\n```".
    fn body_text(&self, result: &ExecutionResult) -> String {
        let shown = |stdout: &str, stderr: &str| {
            truncate_to_tail(select_output(stdout, stderr), self.options.max_output_chars)
        };
        match result {
            ExecutionResult::Completed { stdout, stderr, .. } => shown(stdout, stderr),
            ExecutionResult::TimedOut { stdout, stderr, after } => {
                let mut text = shown(stdout, stderr);
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&format!("[Timed out after {}]", format_duration(*after)));
                text
            }
            ExecutionResult::LaunchFailed { error } => format!("{}{}", LAUNCH_ERROR_PREFIX, error),
        }
    }

    /// Format the reply for `event`. `author` is the resolved display name, if any.
    pub fn format(&self, event: &InboundEvent, result: &ExecutionResult, author: Option<&str>) -> String {
        let mut reply = String::new();
        let prompt = match self.options.mode {
            ReplyMode::Prompt => self.prompt.as_ref(),
            ReplyMode::Plain => None,
        };
        if prompt.is_some() && self.options.show_author {
            reply.push('@');
            reply.push_str(author.unwrap_or(UNKNOWN_USER));
            reply.push('\n');
        }
        reply.push_str(FENCE);
        reply.push('\n');
        if let Some(prompt) = prompt {
            reply.push_str(&prompt.prompt_line(&event.text));
            reply.push('\n');
        }
        reply.push_str(&self.body_text(result));
        reply.push('\n');
        reply.push_str(FENCE);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plain() -> ResponseFormatter {
        ResponseFormatter::new(ReplyConfig::default(), None)
    }

    fn prompt(show_author: bool) -> ResponseFormatter {
        ResponseFormatter::new(
            ReplyConfig {
                mode: ReplyMode::Prompt,
                show_author,
                ..ReplyConfig::default()
            },
            Some(PromptContext {
                user: "ada".to_string(),
                host: "box".to_string(),
                path: "~/src".to_string(),
            }),
        )
    }

    fn completed(stdout: &str, stderr: &str) -> ExecutionResult {
        ExecutionResult::Completed {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(0),
        }
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent::from_user("C1", "U1", text)
    }

    #[test]
    fn stdout_takes_precedence_over_stderr() {
        let body = plain().format(&event("x"), &completed("A", "B"), None);
        assert!(body.contains('A'));
        assert!(!body.contains('B'));
    }

    #[test]
    fn stderr_shown_when_stdout_empty() {
        let body = plain().format(&event("x"), &completed("", "B\n"), None);
        assert_eq!(body, "```\nB\n\n```");
    }

    #[test]
    fn output_is_kept_verbatim_inside_the_fence() {
        let body = plain().format(&event("echo hello"), &completed("hello\n", ""), None);
        assert_eq!(body, "```\nhello\n\n```");
        let body = plain().format(&event("x"), &completed("a\r\n\n", ""), None);
        assert_eq!(body, "```\na\r\n\n\n```");
    }

    #[test]
    fn both_empty_gives_placeholder() {
        let body = plain().format(&event(""), &completed("", ""), None);
        assert_eq!(body, "```\n[No output]\n```");
    }

    #[test]
    fn whitespace_only_stdout_still_wins_and_becomes_placeholder() {
        assert_eq!(select_output("\n", "err"), NO_OUTPUT_PLACEHOLDER);
    }

    #[test]
    fn formatting_is_idempotent() {
        let f = prompt(true);
        let e = event("echo hi");
        let r = completed("hi\n", "");
        assert_eq!(f.format(&e, &r, Some("ada")), f.format(&e, &r, Some("ada")));
    }

    #[test]
    fn prompt_mode_first_line_in_block_is_prompt() {
        let body = prompt(false).format(&event("echo hi"), &completed("hi\n", ""), None);
        assert_eq!(body, "```\nada@box:~/src$ echo hi\nhi\n\n```");
    }

    #[test]
    fn prompt_mode_names_author_above_block() {
        let body = prompt(true).format(&event("id"), &completed("uid=0\n", ""), None);
        assert!(body.starts_with("@unknown_user\n```\nada@box:~/src$ id\n"));
        let body = prompt(true).format(&event("id"), &completed("uid=0\n", ""), Some("Ada"));
        assert!(body.starts_with("@Ada\n```\n"));
    }

    #[test]
    fn plain_mode_ignores_author_and_prompt() {
        let f = ResponseFormatter::new(
            ReplyConfig {
                show_author: true,
                ..ReplyConfig::default()
            },
            Some(PromptContext {
                user: "u".to_string(),
                host: "h".to_string(),
                path: "/".to_string(),
            }),
        );
        assert!(!f.wants_author());
        assert_eq!(f.format(&event("ls"), &completed("a\n", ""), Some("x")), "```\na\n\n```");
    }

    #[test]
    fn timeout_is_reported_after_partial_output() {
        let result = ExecutionResult::TimedOut {
            stdout: "partial\n".to_string(),
            stderr: String::new(),
            after: Duration::from_secs(15),
        };
        assert_eq!(
            plain().format(&event("x"), &result, None),
            "```\npartial\n[Timed out after 15s]\n```"
        );
        let silent = ExecutionResult::TimedOut {
            stdout: String::new(),
            stderr: String::new(),
            after: Duration::from_millis(250),
        };
        assert_eq!(
            plain().format(&event("x"), &silent, None),
            "```\n[No output]\n[Timed out after 250ms]\n```"
        );
    }

    #[test]
    fn launch_failure_is_an_error_line() {
        let result = ExecutionResult::LaunchFailed {
            error: "No such file or directory (os error 2)".to_string(),
        };
        assert_eq!(
            plain().format(&event("x"), &result, None),
            "```\nError executing command: No such file or directory (os error 2)\n```"
        );
    }

    #[test]
    fn long_output_keeps_the_tail() {
        let f = ResponseFormatter::new(
            ReplyConfig {
                max_output_chars: 3,
                ..ReplyConfig::default()
            },
            None,
        );
        assert_eq!(
            f.format(&event("x"), &completed("abcdef", ""), None),
            "```\n[truncated 3 chars]...def\n```"
        );
    }

    #[test]
    fn display_path_abbreviates_home() {
        let home = PathBuf::from("/home/ada");
        assert_eq!(display_path(Path::new("/home/ada"), Some(&home)), "~");
        assert_eq!(display_path(Path::new("/home/ada/src/x"), Some(&home)), "~/src/x");
        assert_eq!(display_path(Path::new("/home/adam"), Some(&home)), "/home/adam");
        assert_eq!(display_path(Path::new("/tmp"), None), "/tmp");
    }

    #[test]
    fn detected_context_is_non_empty() {
        let ctx = PromptContext::detect(Some(Path::new("/")));
        assert!(!ctx.user.is_empty());
        assert!(!ctx.host.is_empty());
        assert_eq!(ctx.path, "/");
    }
}
