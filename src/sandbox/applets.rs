//! Applet and command tables.
//!
//! Three allowlists bound what the sandbox will run and how arguments are
//! rewritten before dispatch. Kept in one place so tests can enumerate
//! them against the dispatch rules.

/// Program names admitted as Wasm applets.
///
/// A name outside this set never reaches the module; the shell reports
/// `not found` with exit 127 instead.
pub const KNOWN_APPLETS: &[&str] = &[
    "[", "awk", "basename", "cat", "chmod", "chown", "cp", "cut", "date", "dd", "df", "diff",
    "dirname", "du", "echo", "env", "expr", "false", "find", "grep", "gzip", "gunzip", "head",
    "hostname", "id", "ln", "ls", "md5sum", "mkdir", "mktemp", "mv", "nl", "od", "printf", "ps",
    "pwd", "readlink", "realpath", "rm", "rmdir", "sed", "seq", "sh", "sha256sum", "sleep",
    "sort", "stat", "tail", "tar", "tee", "test", "touch", "tr", "true", "uname", "uniq", "wc",
    "which", "xargs", "yes",
];

/// Commands whose relative non-flag arguments are always rewritten to
/// container-absolute paths, even when the target does not exist yet.
pub const FILE_ARG_COMMANDS: &[&str] = &[
    "cat", "cp", "dd", "diff", "du", "find", "gunzip", "gzip", "head", "ln", "ls", "mkdir",
    "mv", "readlink", "realpath", "rm", "rmdir", "stat", "tail", "tar", "touch",
];

/// Commands the host implements natively instead of dispatching to Wasm.
///
/// Chosen because WASI lacks the capability (hostname, id), deterministic
/// output is required (date, uname), or filesystem semantics diverge from
/// WASI (readlink must resolve inside the virtual root).
pub const HOST_BUILTINS: &[&str] = &[
    "base64", "basename", "date", "dirname", "env", "hostname", "id", "ln", "md5sum", "mktemp",
    "pwd", "readlink", "seq", "sha256sum", "stat", "tee", "touch", "uname", "which",
];

/// Commands accepted and silently ignored (no permission model to act on).
pub const NOOP_COMMANDS: &[&str] = &["chmod", "chown"];

/// Names recognized as shells; their scripts run through the interpreter.
pub const SHELL_NAMES: &[&str] = &["sh", "/bin/sh", "bash", "/bin/bash", "ash", "/bin/ash"];

pub fn is_known_applet(name: &str) -> bool {
    KNOWN_APPLETS.contains(&name)
}

pub fn is_file_arg_command(name: &str) -> bool {
    FILE_ARG_COMMANDS.contains(&name)
}

pub fn is_host_builtin(name: &str) -> bool {
    HOST_BUILTINS.contains(&name)
}

pub fn is_noop_command(name: &str) -> bool {
    NOOP_COMMANDS.contains(&name)
}

pub fn is_shell(name: &str) -> bool {
    SHELL_NAMES.contains(&name)
}

/// Joins a possibly-relative container path onto a container CWD.
pub fn absolutize(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    if cwd == "/" {
        format!("/{path}")
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    }
}

/// Rewrites argv for dispatch to an applet.
///
/// Relative non-flag arguments become container-absolute when the command
/// is in [`FILE_ARG_COMMANDS`], or when the argument already resolves to
/// an existing file (checked by `exists`). Everything else passes through,
/// so `echo hello` keeps `hello`.
pub fn rewrite_args<F>(cmd: &str, args: &[String], cwd: &str, exists: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let always = is_file_arg_command(cmd);
    args.iter()
        .map(|arg| {
            if arg.starts_with('-') || arg.starts_with('/') {
                return arg.clone();
            }
            let absolute = absolutize(cwd, arg);
            if always || exists(&absolute) {
                absolute
            } else {
                arg.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_membership() {
        assert!(is_known_applet("echo"));
        assert!(is_known_applet("sh"));
        assert!(!is_known_applet("curl"));
        assert!(is_file_arg_command("cp"));
        assert!(!is_file_arg_command("echo"));
        assert!(is_host_builtin("pwd"));
        assert!(is_noop_command("chmod"));
        assert!(is_shell("/bin/sh"));
    }

    #[test]
    fn file_arg_commands_always_rewrite() {
        let out = rewrite_args("ls", &v(&["data", "-l"]), "/work", |_| false);
        assert_eq!(out, v(&["/work/data", "-l"]));
    }

    #[test]
    fn other_commands_rewrite_only_existing_files() {
        let out = rewrite_args("echo", &v(&["hello"]), "/work", |_| false);
        assert_eq!(out, v(&["hello"]), "echo args stay verbatim");

        let out = rewrite_args("wc", &v(&["notes.txt"]), "/work", |p| {
            p == "/work/notes.txt"
        });
        assert_eq!(out, v(&["/work/notes.txt"]));
    }

    #[test]
    fn absolute_and_flag_args_untouched() {
        let out = rewrite_args("cp", &v(&["-r", "/src", "dst"]), "/", |_| false);
        assert_eq!(out, v(&["-r", "/src", "/dst"]));
    }

    #[test]
    fn absolutize_handles_root_cwd() {
        assert_eq!(absolutize("/", "a"), "/a");
        assert_eq!(absolutize("/work", "a/b"), "/work/a/b");
        assert_eq!(absolutize("/work/", "a"), "/work/a");
        assert_eq!(absolutize("/work", "/abs"), "/abs");
    }
}
