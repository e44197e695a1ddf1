//! Shell execution.
//!
//! Pipelines run stage by stage with buffered byte handoff; each stage's
//! stdout feeds the next stage's stdin. External commands dispatch in
//! order: shell builtin, host builtin, script on PATH, applet, then
//! `not found` with exit 127.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::constants::EXIT_CODE_NOT_FOUND;
use crate::error::{Error, Result};

use super::super::applets::{absolutize, is_host_builtin, is_noop_command, is_shell, rewrite_args};
use super::super::builtins::run_host_builtin;
use super::super::rootfs::VirtualRoot;
use super::super::wasm::{AppletInvocation, AppletRunner, ExecOutcome};
use super::arith;
use super::lexer::{Word, WordPart};
use super::parser::{parse, AndOrList, Connector, Pipeline, Redirect, SimpleCommand};

/// Exit code for shell syntax errors.
pub const EXIT_CODE_SYNTAX: i64 = 2;

const PATH_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"];

/// Mutable shell state shared across a script run.
#[derive(Debug, Clone)]
pub struct ShellEnv {
    pub vars: HashMap<String, String>,
    pub exported: HashSet<String>,
    pub cwd: String,
    pub last_status: i64,
    pub errexit: bool,
    pub pipefail: bool,
}

impl ShellEnv {
    pub fn new(cwd: &str) -> ShellEnv {
        let mut vars = HashMap::new();
        vars.insert("PWD".to_string(), cwd.to_string());
        vars.insert("HOME".to_string(), "/root".to_string());
        vars.insert(
            "PATH".to_string(),
            "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin".to_string(),
        );
        let exported = ["PWD", "HOME", "PATH"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ShellEnv {
            vars,
            exported,
            cwd: cwd.to_string(),
            last_status: 0,
            errexit: false,
            pipefail: false,
        }
    }

    pub fn set(&mut self, name: &str, value: String) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn export(&mut self, name: &str) {
        self.exported.insert(name.to_string());
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "@" | "*" => {
                let count: usize = self.vars.get("#")?.parse().ok()?;
                let joined = (1..=count)
                    .filter_map(|i| self.vars.get(&i.to_string()).cloned())
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(joined)
            }
            _ => self.vars.get(name).cloned(),
        }
    }

    /// Environment passed to external commands.
    pub fn exported_env(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .exported
            .iter()
            .filter_map(|name| self.vars.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        out.sort();
        out
    }

    /// Seeds positional parameters `$0..$n` and `$#`.
    pub fn set_positionals(&mut self, zero: &str, args: &[String]) {
        self.vars.insert("0".to_string(), zero.to_string());
        for (i, arg) in args.iter().enumerate() {
            self.vars.insert((i + 1).to_string(), arg.clone());
        }
        self.vars.insert("#".to_string(), args.len().to_string());
    }
}

/// One script interpreter over a virtual root and an applet runner.
pub struct Shell<'a> {
    pub env: ShellEnv,
    runner: &'a dyn AppletRunner,
    root: &'a VirtualRoot,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Fed to the first command executed, then empty.
    pub stdin: Vec<u8>,
    exiting: Option<i64>,
}

impl<'a> Shell<'a> {
    pub fn new(runner: &'a dyn AppletRunner, root: &'a VirtualRoot, env: ShellEnv) -> Shell<'a> {
        Shell {
            env,
            runner,
            root,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdin: Vec::new(),
            exiting: None,
        }
    }

    /// Runs a script to completion and returns its exit status.
    pub fn run<'s>(
        &'s mut self,
        source: String,
    ) -> Pin<Box<dyn Future<Output = i64> + Send + 's>> {
        Box::pin(async move {
            let program = match parse(&source) {
                Ok(program) => program,
                Err(e) => {
                    let msg = match &e {
                        Error::InvalidParameter(msg) => msg.clone(),
                        other => other.to_string(),
                    };
                    self.stderr.extend_from_slice(msg.as_bytes());
                    self.stderr.push(b'\n');
                    self.env.last_status = EXIT_CODE_SYNTAX;
                    return EXIT_CODE_SYNTAX;
                }
            };
            for list in &program.lists {
                let status = self.exec_list(list).await;
                self.env.last_status = status;
                if let Some(code) = self.exiting {
                    return code;
                }
                if self.env.errexit && status != 0 {
                    return status;
                }
            }
            self.env.last_status
        })
    }

    async fn exec_list(&mut self, list: &AndOrList) -> i64 {
        let mut status = self.exec_pipeline(&list.first).await;
        for (connector, pipeline) in &list.rest {
            if self.exiting.is_some() {
                break;
            }
            let proceed = match connector {
                Connector::And => status == 0,
                Connector::Or => status != 0,
            };
            if proceed {
                status = self.exec_pipeline(pipeline).await;
            }
        }
        status
    }

    async fn exec_pipeline(&mut self, pipeline: &Pipeline) -> i64 {
        let mut carry: Vec<u8> = Vec::new();
        let mut statuses = Vec::with_capacity(pipeline.stages.len());
        let last = pipeline.stages.len() - 1;
        for (i, stage) in pipeline.stages.iter().enumerate() {
            if self.exiting.is_some() {
                break;
            }
            let stdin = if i == 0 && carry.is_empty() {
                std::mem::take(&mut self.stdin)
            } else {
                std::mem::take(&mut carry)
            };
            let (stdout, status) = self.run_stage(stage, stdin).await;
            statuses.push(status);
            if i == last {
                self.stdout.extend_from_slice(&stdout);
            } else {
                carry = stdout;
            }
        }
        let final_status = statuses.last().copied().unwrap_or(0);
        if self.env.pipefail {
            statuses
                .iter()
                .rev()
                .find(|&&s| s != 0)
                .copied()
                .unwrap_or(final_status)
        } else {
            final_status
        }
    }

    /// Runs one pipeline stage: expansion, redirects, dispatch. Returns
    /// the bytes destined for the next stage and the exit status.
    async fn run_stage(&mut self, stage: &SimpleCommand, stdin: Vec<u8>) -> (Vec<u8>, i64) {
        // Assignments: persistent when there is no command word, scoped
        // and exported otherwise.
        let mut saved: Vec<(String, Option<String>, bool)> = Vec::new();
        for (name, value) in &stage.assignments {
            let value = match self.expand_to_string(value).await {
                Ok(v) => v,
                Err(e) => return self.expansion_error(e),
            };
            if !stage.words.is_empty() {
                saved.push((
                    name.clone(),
                    self.env.vars.get(name).cloned(),
                    self.env.exported.contains(name),
                ));
                self.env.export(name);
            }
            self.env.set(name, value);
        }

        let mut argv = Vec::new();
        for word in &stage.words {
            match self.expand_word(word).await {
                Ok(fields) => argv.extend(fields),
                Err(e) => return self.expansion_error(e),
            }
        }

        let result = if argv.is_empty() {
            Ok(ExecOutcome::success(""))
        } else {
            self.run_redirected(&argv, stage, stdin).await
        };

        for (name, old, was_exported) in saved {
            match old {
                Some(value) => self.env.set(&name, value),
                None => {
                    self.env.vars.remove(&name);
                }
            }
            if !was_exported {
                self.env.exported.remove(&name);
            }
        }

        match result {
            Ok(outcome) => {
                self.stderr.extend_from_slice(&outcome.stderr);
                (outcome.stdout, outcome.code)
            }
            Err(e) => {
                self.stderr.extend_from_slice(format!("sh: {e}\n").as_bytes());
                (Vec::new(), 1)
            }
        }
    }

    fn expansion_error(&mut self, e: Error) -> (Vec<u8>, i64) {
        let msg = match &e {
            Error::InvalidParameter(msg) => msg.clone(),
            other => other.to_string(),
        };
        self.stderr.extend_from_slice(msg.as_bytes());
        self.stderr.push(b'\n');
        (Vec::new(), EXIT_CODE_SYNTAX)
    }

    /// Applies the stage's redirects around command dispatch.
    async fn run_redirected(
        &mut self,
        argv: &[String],
        stage: &SimpleCommand,
        mut stdin: Vec<u8>,
    ) -> Result<ExecOutcome> {
        for redirect in &stage.redirects {
            if let Redirect::In { target } = redirect {
                let path = self.expand_to_string(target).await?;
                let host = self.root.resolve(&absolutize(&self.env.cwd, &path));
                stdin = std::fs::read(&host)
                    .map_err(|_| Error::InvalidParameter(format!("sh: can't open {path}")))?;
            }
        }

        let mut outcome = self.run_command(argv, stdin).await?;

        for redirect in &stage.redirects {
            match redirect {
                Redirect::ErrToOut => {
                    let merged = std::mem::take(&mut outcome.stderr);
                    outcome.stdout.extend_from_slice(&merged);
                }
                Redirect::Out { fd, target, append } => {
                    let path = self.expand_to_string(target).await?;
                    let host = self.root.resolve(&absolutize(&self.env.cwd, &path));
                    if let Some(parent) = host.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let bytes = if *fd == 2 {
                        std::mem::take(&mut outcome.stderr)
                    } else {
                        std::mem::take(&mut outcome.stdout)
                    };
                    if *append {
                        use std::io::Write;
                        std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(&host)?
                            .write_all(&bytes)?;
                    } else {
                        std::fs::write(&host, &bytes)?;
                    }
                }
                Redirect::In { .. } => {}
            }
        }
        Ok(outcome)
    }

    /// Command dispatch.
    async fn run_command(&mut self, argv: &[String], stdin: Vec<u8>) -> Result<ExecOutcome> {
        let name = argv[0].as_str();
        let bare = name.rsplit('/').next().unwrap_or(name);
        let args = &argv[1..];

        if is_shell(name) {
            return self.run_nested_shell(args, stdin).await;
        }
        if let Some(outcome) = self.run_builtin(bare, args, &stdin).await {
            return outcome;
        }
        if is_noop_command(bare) {
            return Ok(ExecOutcome::success(""));
        }
        if is_host_builtin(bare) {
            return run_host_builtin(
                bare,
                args,
                &self.env.exported_env(),
                &self.env.cwd,
                &stdin,
                self.root,
            );
        }
        if let Some(script_path) = self.find_script(name) {
            return self.run_script_file(&script_path, args, stdin).await;
        }
        if self.runner.has_applet(bare) {
            let cwd = self.env.cwd.clone();
            let rewritten = rewrite_args(bare, args, &cwd, |p| self.root.exists(p));
            let mut invocation_argv = vec![bare.to_string()];
            invocation_argv.extend(rewritten);
            return self
                .runner
                .run(AppletInvocation {
                    argv: invocation_argv,
                    env: self.env.exported_env(),
                    stdin,
                    root: self.root,
                })
                .await;
        }
        debug!(command = name, "command not found");
        Ok(ExecOutcome::failure(
            EXIT_CODE_NOT_FOUND,
            format!("sh: {name}: not found\n"),
        ))
    }

    /// Shell builtins that mutate interpreter state.
    async fn run_builtin(
        &mut self,
        name: &str,
        args: &[String],
        stdin: &[u8],
    ) -> Option<Result<ExecOutcome>> {
        let outcome = match name {
            ":" => ExecOutcome::success(""),
            "cd" => {
                let target = match args.first().map(String::as_str) {
                    None => self.env.lookup("HOME").unwrap_or_else(|| "/".to_string()),
                    Some("-") => self.env.lookup("OLDPWD").unwrap_or_else(|| ".".to_string()),
                    Some(dir) => dir.to_string(),
                };
                let next = normalize_cwd(&absolutize(&self.env.cwd, &target));
                if !self.root.resolve(&next).is_dir() {
                    ExecOutcome::failure(
                        1,
                        format!("sh: cd: {target}: No such file or directory\n"),
                    )
                } else {
                    let old = self.env.cwd.clone();
                    self.env.set("OLDPWD", old);
                    self.env.set("PWD", next.clone());
                    self.env.cwd = next;
                    ExecOutcome::success("")
                }
            }
            "export" => {
                for arg in args {
                    match arg.split_once('=') {
                        Some((name, value)) => {
                            self.env.set(name, value.to_string());
                            self.env.export(name);
                        }
                        None => self.env.export(arg),
                    }
                }
                ExecOutcome::success("")
            }
            "unset" => {
                for arg in args {
                    self.env.vars.remove(arg);
                    self.env.exported.remove(arg);
                }
                ExecOutcome::success("")
            }
            "set" => {
                let mut iter = args.iter().peekable();
                while let Some(arg) = iter.next() {
                    match arg.as_str() {
                        "-e" => self.env.errexit = true,
                        "+e" => self.env.errexit = false,
                        "-o" if iter.peek().map(|s| s.as_str()) == Some("pipefail") => {
                            iter.next();
                            self.env.pipefail = true;
                        }
                        "+o" if iter.peek().map(|s| s.as_str()) == Some("pipefail") => {
                            iter.next();
                            self.env.pipefail = false;
                        }
                        // -x and -u are accepted without effect.
                        _ => {}
                    }
                }
                ExecOutcome::success("")
            }
            "exit" => {
                let code = args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(self.env.last_status);
                self.exiting = Some(code);
                ExecOutcome {
                    code,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }
            }
            "read" => {
                let line = stdin
                    .split(|&b| b == b'\n')
                    .next()
                    .map(|l| String::from_utf8_lossy(l).into_owned())
                    .unwrap_or_default();
                let var = args.first().map(String::as_str).unwrap_or("REPLY");
                self.env.set(var, line);
                ExecOutcome::success("")
            }
            "." | "source" => {
                let Some(path) = args.first() else {
                    return Some(Ok(ExecOutcome::failure(2, "sh: .: missing file\n")));
                };
                let host = self.root.resolve(&absolutize(&self.env.cwd, path));
                let source = match std::fs::read_to_string(&host) {
                    Ok(s) => s,
                    Err(_) => {
                        return Some(Ok(ExecOutcome::failure(
                            1,
                            format!("sh: .: {path}: not found\n"),
                        )))
                    }
                };
                // Sourced scripts share this shell's state; their output
                // lands in our buffers directly.
                let code = self.run(strip_shebang(source)).await;
                ExecOutcome {
                    code,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }
            }
            _ => return None,
        };
        Some(Ok(outcome))
    }

    /// `sh [-e] [-o pipefail] -c cmd [name args...]` or `sh script [args]`.
    async fn run_nested_shell(&mut self, args: &[String], stdin: Vec<u8>) -> Result<ExecOutcome> {
        let mut errexit = false;
        let mut pipefail = false;
        let mut command: Option<String> = None;
        let mut rest: Vec<String> = Vec::new();
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-e" => errexit = true,
                "-o" if iter.peek().map(|s| s.as_str()) == Some("pipefail") => {
                    iter.next();
                    pipefail = true;
                }
                "-x" | "-u" => {}
                "-c" => {
                    command = iter.next().cloned();
                    rest.extend(iter.cloned());
                    break;
                }
                _ => {
                    rest.push(arg.clone());
                    rest.extend(iter.cloned());
                    break;
                }
            }
        }

        let (source, zero, positionals) = match command {
            Some(source) => {
                let zero = rest.first().cloned().unwrap_or_else(|| "sh".to_string());
                let positionals = rest.get(1..).unwrap_or(&[]).to_vec();
                (source, zero, positionals)
            }
            None => {
                let Some(path) = rest.first().cloned() else {
                    return Err(Error::InvalidParameter(
                        "sh: interactive mode is not supported".into(),
                    ));
                };
                let host = self.root.resolve(&absolutize(&self.env.cwd, &path));
                let source = std::fs::read_to_string(&host)
                    .map_err(|_| Error::InvalidParameter(format!("sh: {path}: not found")))?;
                (strip_shebang(source), path, rest[1..].to_vec())
            }
        };

        let mut env = self.env.clone();
        env.errexit = errexit;
        env.pipefail = pipefail;
        env.set_positionals(&zero, &positionals);
        let mut child = Shell::new(self.runner, self.root, env);
        child.stdin = stdin;
        let code = child.run(source).await;
        Ok(ExecOutcome {
            code,
            stdout: child.stdout,
            stderr: child.stderr,
        })
    }

    /// Resolves a command name to a script file inside the root: explicit
    /// paths directly, bare names through PATH directories.
    fn find_script(&self, name: &str) -> Option<String> {
        if name.contains('/') {
            let path = absolutize(&self.env.cwd, name);
            let host = self.root.resolve(&path);
            return (host.is_file()).then_some(path);
        }
        for dir in PATH_DIRS {
            let path = format!("{dir}/{name}");
            if self.root.resolve(&path).is_file() {
                return Some(path);
            }
        }
        None
    }

    async fn run_script_file(
        &mut self,
        path: &str,
        args: &[String],
        stdin: Vec<u8>,
    ) -> Result<ExecOutcome> {
        let host = self.root.resolve(path);
        let source = std::fs::read_to_string(&host)
            .map_err(|_| Error::InvalidParameter(format!("sh: {path}: not found")))?;
        let mut env = self.env.clone();
        env.set_positionals(path, args);
        let mut child = Shell::new(self.runner, self.root, env);
        child.stdin = stdin;
        let code = child.run(strip_shebang(source)).await;
        Ok(ExecOutcome {
            code,
            stdout: child.stdout,
            stderr: child.stderr,
        })
    }

    /// Expands a word into fields. Unquoted expansions field-split on
    /// whitespace; quoted ones never do.
    async fn expand_word(&mut self, word: &Word) -> Result<Vec<String>> {
        let mut fields: Vec<String> = Vec::new();
        let mut current: Option<String> = None;

        for part in &word.parts {
            let (value, quoted) = match part {
                WordPart::Literal { text, quoted } => (text.clone(), *quoted),
                WordPart::Var {
                    name,
                    default,
                    quoted,
                } => {
                    let value = match self.env.lookup(name) {
                        Some(v) if !v.is_empty() => v,
                        _ => default.clone().unwrap_or_default(),
                    };
                    (value, *quoted)
                }
                WordPart::Status { quoted } => (self.env.last_status.to_string(), *quoted),
                WordPart::Arith { body, quoted } => {
                    let env = &self.env;
                    let value = arith::evaluate(body, |name| env.lookup(name))?;
                    (value.to_string(), *quoted)
                }
                WordPart::CmdSub { body, quoted } => {
                    (self.command_substitution(body).await, *quoted)
                }
            };

            let literal = matches!(part, WordPart::Literal { .. });
            if quoted || literal {
                current.get_or_insert_with(String::new).push_str(&value);
            } else {
                append_split(&mut fields, &mut current, &value);
            }
        }
        if let Some(field) = current {
            fields.push(field);
        }
        Ok(fields)
    }

    /// Expands a word into a single string (redirect targets, assignments).
    async fn expand_to_string(&mut self, word: &Word) -> Result<String> {
        Ok(self.expand_word(word).await?.join(" "))
    }

    /// Runs the substitution body in a subshell and captures its stdout
    /// with trailing newlines trimmed.
    async fn command_substitution(&mut self, body: &str) -> String {
        let mut child = Shell::new(self.runner, self.root, self.env.clone());
        let status = child.run(body.to_string()).await;
        self.env.last_status = status;
        self.stderr.extend_from_slice(&child.stderr);
        let mut out = String::from_utf8_lossy(&child.stdout).into_owned();
        while out.ends_with('\n') {
            out.pop();
        }
        out
    }
}

fn append_split(fields: &mut Vec<String>, current: &mut Option<String>, value: &str) {
    if value.starts_with(char::is_whitespace) {
        if let Some(field) = current.take() {
            fields.push(field);
        }
    }
    let mut pieces = value.split_whitespace();
    if let Some(first) = pieces.next() {
        current.get_or_insert_with(String::new).push_str(first);
        for piece in pieces {
            if let Some(field) = current.take() {
                fields.push(field);
            }
            *current = Some(piece.to_string());
        }
    }
    if value.ends_with(char::is_whitespace) {
        if let Some(field) = current.take() {
            fields.push(field);
        }
    }
}

fn strip_shebang(source: String) -> String {
    if source.starts_with("#!") {
        match source.split_once('\n') {
            Some((_, rest)) => rest.to_string(),
            None => String::new(),
        }
    } else {
        source
    }
}

/// Lexical normalization for `cd`: collapses `.` and `..` segments.
fn normalize_cwd(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    format!("/{}", out.join("/"))
}

#[cfg(test)]
mod tests {
    use super::super::super::applets_native::NativeApplets;
    use super::*;

    async fn run_shell(script: &str, root: &VirtualRoot) -> (i64, String, String) {
        let runner = NativeApplets;
        let mut shell = Shell::new(&runner, root, ShellEnv::new("/"));
        let code = shell.run(script.to_string()).await;
        (
            code,
            String::from_utf8_lossy(&shell.stdout).into_owned(),
            String::from_utf8_lossy(&shell.stderr).into_owned(),
        )
    }

    #[tokio::test]
    async fn echo_to_stdout() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, _) = run_shell("echo hello world", &root).await;
        assert_eq!(code, 0);
        assert_eq!(out, "hello world\n");
    }

    #[tokio::test]
    async fn pipeline_handoff() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, _) = run_shell("printf 'b\\na\\nb\\n' | sort | uniq | wc -l", &root).await;
        assert_eq!(code, 0, "pipeline runs");
        assert_eq!(out, "2\n");

        let (_, out, _) = run_shell("echo banana | grep ana", &root).await;
        assert_eq!(out, "banana\n");
    }

    #[tokio::test]
    async fn variable_expansion_and_defaults() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("GREETING=hi; echo $GREETING there", &root).await;
        assert_eq!(out, "hi there\n");

        let (_, out, _) = run_shell("echo ${MISSING:-fallback}", &root).await;
        assert_eq!(out, "fallback\n");

        let (_, out, _) = run_shell("echo '$HOME'", &root).await;
        assert_eq!(out, "$HOME\n", "single quotes suppress expansion");
    }

    #[tokio::test]
    async fn arithmetic_expansion() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, _) = run_shell("echo $((3+4*2))", &root).await;
        assert_eq!(code, 0);
        assert_eq!(out, "11\n");

        let (_, out, _) = run_shell("N=6; echo $((N*7))", &root).await;
        assert_eq!(out, "42\n");
    }

    #[tokio::test]
    async fn command_substitution() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("echo got:$(echo inner)", &root).await;
        assert_eq!(out, "got:inner\n");
    }

    #[tokio::test]
    async fn exit_status_and_dollar_question() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("false; echo $?", &root).await;
        assert_eq!(out, "1\n");
        let (code, _, _) = run_shell("exit 7", &root).await;
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn and_or_short_circuit() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("true && echo yes || echo no", &root).await;
        assert_eq!(out, "yes\n");
        let (_, out, _) = run_shell("false && echo yes || echo no", &root).await;
        assert_eq!(out, "no\n");
    }

    #[tokio::test]
    async fn errexit_stops_script() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, _) = run_shell("set -e\nfalse\necho unreachable", &root).await;
        assert_eq!(code, 1);
        assert!(!out.contains("unreachable"));
    }

    #[tokio::test]
    async fn pipefail_propagates_failure() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, _, _) = run_shell("false | true", &root).await;
        assert_eq!(code, 0, "without pipefail the last stage wins");
        let (code, _, _) = run_shell("set -o pipefail\nfalse | true", &root).await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn redirects_write_and_read_files() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, _, _) = run_shell("echo first > /tmp/out.txt", &root).await;
        assert_eq!(code, 0);
        let (_, out, _) = run_shell("cat < /tmp/out.txt", &root).await;
        assert_eq!(out, "first\n");
        run_shell("echo second >> /tmp/out.txt", &root).await;
        let (_, out, _) = run_shell("cat /tmp/out.txt", &root).await;
        assert_eq!(out, "first\nsecond\n");
    }

    #[tokio::test]
    async fn stderr_redirect_and_merge() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, _, err) = run_shell("nonexistent-cmd", &root).await;
        assert!(err.contains("not found"));

        let (_, out, err) = run_shell("nonexistent-cmd 2>&1", &root).await;
        assert!(out.contains("not found"), "stderr merged into stdout");
        assert!(err.is_empty());

        run_shell("nonexistent-cmd 2> /tmp/err.txt", &root).await;
        let (_, out, _) = run_shell("cat /tmp/err.txt", &root).await;
        assert!(out.contains("not found"));
    }

    #[tokio::test]
    async fn unknown_command_exits_127() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, _, err) = run_shell("definitely-not-a-thing", &root).await;
        assert_eq!(code, 127);
        assert_eq!(err, "sh: definitely-not-a-thing: not found\n");
    }

    #[tokio::test]
    async fn syntax_error_exits_2() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, _, err) = run_shell("echo |", &root).await;
        assert_eq!(code, 2);
        assert!(err.contains("syntax error"));
    }

    #[tokio::test]
    async fn cd_updates_pwd() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("cd /tmp && pwd", &root).await;
        assert_eq!(out, "/tmp\n");
        let (code, _, err) = run_shell("cd /no/such/dir", &root).await;
        assert_eq!(code, 1);
        assert!(err.contains("No such file or directory"));
    }

    #[tokio::test]
    async fn export_reaches_external_commands() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("export MARKER=42; env | grep MARKER", &root).await;
        assert_eq!(out, "MARKER=42\n");
        let (_, out, _) = run_shell("PLAIN=1; env | grep -c PLAIN", &root).await;
        assert_eq!(out, "0\n", "unexported vars stay internal");
    }

    #[tokio::test]
    async fn scoped_assignment_restores() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("X=outer; X=inner env | grep X=; echo $X", &root).await;
        assert!(out.contains("X=inner"));
        assert!(out.ends_with("outer\n"));
    }

    #[tokio::test]
    async fn nested_sh_dash_c() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, _) = run_shell("sh -c 'echo nested $((1+1))'", &root).await;
        assert_eq!(code, 0);
        assert_eq!(out, "nested 2\n");
    }

    #[tokio::test]
    async fn script_on_path_runs_with_positionals() {
        let root = VirtualRoot::new(&[]).unwrap();
        std::fs::write(
            root.host_root().join("usr/local/bin/greet"),
            "#!/bin/sh\necho hello $1\n",
        )
        .unwrap();
        let (code, out, _) = run_shell("greet world", &root).await;
        assert_eq!(code, 0);
        assert_eq!(out, "hello world\n");
    }

    #[tokio::test]
    async fn word_splitting_of_unquoted_vars() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (_, out, _) = run_shell("ARGS='a b'; echo $ARGS | wc -w", &root).await;
        assert_eq!(out, "2\n");
        let (_, out, _) = run_shell("ARGS='a b'; echo \"$ARGS\"x", &root).await;
        assert_eq!(out, "a bx\n");
    }

    #[tokio::test]
    async fn chmod_is_a_noop() {
        let root = VirtualRoot::new(&[]).unwrap();
        let (code, out, err) = run_shell("chmod +x /tmp", &root).await;
        assert_eq!((code, out.as_str(), err.as_str()), (0, "", ""));
    }
}
