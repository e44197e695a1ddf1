//! Native applet subset.
//!
//! Implements the common applets directly against the virtual root so the
//! sandbox works without a Wasm module configured. Where a host module is
//! available the Wasm runner takes precedence; this runner covers the
//! subset the shell's own scripts lean on.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

use super::rootfs::VirtualRoot;
use super::wasm::{AppletInvocation, AppletRunner, ExecOutcome};

const SUPPORTED: &[&str] = &[
    "[", "cat", "cp", "cut", "echo", "expr", "false", "grep", "head", "ls", "mkdir", "mv",
    "printf", "rm", "rmdir", "sleep", "sort", "tail", "test", "tr", "true", "uniq", "wc", "yes",
];

/// Runs a fixed applet subset natively on the host filesystem.
#[derive(Debug, Default)]
pub struct NativeApplets;

#[async_trait]
impl AppletRunner for NativeApplets {
    fn has_applet(&self, name: &str) -> bool {
        SUPPORTED.contains(&name)
    }

    async fn run(&self, invocation: AppletInvocation<'_>) -> Result<ExecOutcome> {
        let Some((name, args)) = invocation.argv.split_first() else {
            return Ok(ExecOutcome::failure(127, "sh: : not found\n"));
        };
        if name == "sleep" {
            let secs = args
                .first()
                .and_then(|a| a.parse::<f64>().ok())
                .unwrap_or(0.0);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
            return Ok(ExecOutcome::success(""));
        }
        Ok(dispatch(name, args, &invocation.stdin, invocation.root))
    }
}

fn dispatch(name: &str, args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    match name {
        "true" => ExecOutcome::success(""),
        "false" => ExecOutcome::failure(1, ""),
        "echo" => run_echo(args),
        "printf" => run_printf(args),
        "yes" => {
            // Bounded: an unbounded yes would fill the log buffer anyway.
            let word = args.first().map(String::as_str).unwrap_or("y");
            let mut out = String::new();
            for _ in 0..4096 {
                out.push_str(word);
                out.push('\n');
            }
            ExecOutcome::success(out)
        }
        "cat" => run_cat(args, stdin, root),
        "head" => run_head_tail(args, stdin, root, true),
        "tail" => run_head_tail(args, stdin, root, false),
        "wc" => run_wc(args, stdin, root),
        "sort" => run_sort(args, stdin, root),
        "uniq" => run_uniq(args, stdin, root),
        "tr" => run_tr(args, stdin),
        "cut" => run_cut(args, stdin, root),
        "grep" => run_grep(args, stdin, root),
        "ls" => run_ls(args, root),
        "mkdir" => run_mkdir(args, root),
        "rm" => run_rm(args, root),
        "rmdir" => run_rmdir(args, root),
        "cp" => run_cp(args, root),
        "mv" => run_mv(args, root),
        "test" | "[" => run_test(name, args, root),
        "expr" => run_expr(args),
        other => ExecOutcome::failure(127, format!("sh: {other}: not found\n")),
    }
}

fn run_echo(args: &[String]) -> ExecOutcome {
    let (newline, rest) = match args.first().map(String::as_str) {
        Some("-n") => (false, &args[1..]),
        _ => (true, args),
    };
    let mut out = rest.join(" ");
    if newline {
        out.push('\n');
    }
    ExecOutcome::success(out)
}

fn run_printf(args: &[String]) -> ExecOutcome {
    let Some(fmt) = args.first() else {
        return ExecOutcome::failure(1, "printf: missing format\n");
    };
    let mut out = String::new();
    let mut values = args[1..].iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '%' => match chars.next() {
                Some('%') => out.push('%'),
                Some('s') => out.push_str(values.next().map(String::as_str).unwrap_or("")),
                Some('d') => {
                    let n: i64 = values
                        .next()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_default();
                    out.push_str(&n.to_string());
                }
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            },
            other => out.push(other),
        }
    }
    ExecOutcome::success(out)
}

/// Reads named files, or stdin when no file operands are given.
fn gather_input(args: &[String], stdin: &[u8], root: &VirtualRoot) -> std::io::Result<Vec<u8>> {
    let files: Vec<&String> = args
        .iter()
        .filter(|a| !a.starts_with('-') || a.as_str() == "-")
        .collect();
    if files.is_empty() {
        return Ok(stdin.to_vec());
    }
    let mut data = Vec::new();
    for file in files {
        if file.as_str() == "-" {
            data.extend_from_slice(stdin);
        } else {
            data.extend_from_slice(&std::fs::read(root.resolve(file))?);
        }
    }
    Ok(data)
}

fn run_cat(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    match gather_input(args, stdin, root) {
        Ok(data) => ExecOutcome {
            code: 0,
            stdout: data,
            stderr: Vec::new(),
        },
        Err(e) => ExecOutcome::failure(1, format!("cat: {e}\n")),
    }
}

fn parse_count(args: &[String]) -> (usize, Vec<String>) {
    let mut count = 10;
    let mut rest = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "-n" {
            if let Some(n) = iter.next().and_then(|v| v.parse().ok()) {
                count = n;
            }
        } else if let Some(n) = arg.strip_prefix("-n").and_then(|v| v.parse().ok()) {
            count = n;
        } else if let Some(n) = arg.strip_prefix('-').and_then(|v| v.parse().ok()) {
            count = n;
        } else {
            rest.push(arg.clone());
        }
    }
    (count, rest)
}

fn run_head_tail(args: &[String], stdin: &[u8], root: &VirtualRoot, head: bool) -> ExecOutcome {
    let (count, files) = parse_count(args);
    let data = match gather_input(&files, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(1, format!("{e}\n")),
    };
    let text = String::from_utf8_lossy(&data);
    let lines: Vec<&str> = text.lines().collect();
    let selected: Vec<&str> = if head {
        lines.iter().take(count).copied().collect()
    } else {
        lines.iter().rev().take(count).rev().copied().collect()
    };
    let mut out = selected.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    ExecOutcome::success(out)
}

fn run_wc(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let flags: Vec<&String> = args.iter().filter(|a| a.starts_with('-')).collect();
    let files: Vec<String> = args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();
    let data = match gather_input(&files, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(1, format!("wc: {e}\n")),
    };
    let lines = data.iter().filter(|&&b| b == b'\n').count();
    let words = String::from_utf8_lossy(&data).split_whitespace().count();
    let bytes = data.len();
    let suffix = files.first().map(|f| format!(" {f}")).unwrap_or_default();
    let out = match flags.first().map(|f| f.as_str()) {
        Some("-l") => format!("{lines}{suffix}\n"),
        Some("-w") => format!("{words}{suffix}\n"),
        Some("-c") => format!("{bytes}{suffix}\n"),
        _ => format!("{lines:8}{words:8}{bytes:8}{suffix}\n"),
    };
    ExecOutcome::success(out)
}

fn run_sort(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let reverse = args.iter().any(|a| a == "-r");
    let numeric = args.iter().any(|a| a == "-n");
    let unique = args.iter().any(|a| a == "-u");
    let data = match gather_input(args, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(1, format!("sort: {e}\n")),
    };
    let text = String::from_utf8_lossy(&data);
    let mut lines: Vec<&str> = text.lines().collect();
    if numeric {
        lines.sort_by_key(|l| l.trim().parse::<i64>().unwrap_or(0));
    } else {
        lines.sort_unstable();
    }
    if unique {
        lines.dedup();
    }
    if reverse {
        lines.reverse();
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    ExecOutcome::success(out)
}

fn run_uniq(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let count = args.iter().any(|a| a == "-c");
    let data = match gather_input(args, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(1, format!("uniq: {e}\n")),
    };
    let text = String::from_utf8_lossy(&data);
    let mut out = String::new();
    let mut prev: Option<&str> = None;
    let mut run = 0usize;
    let mut flush = |line: Option<&str>, n: usize, out: &mut String| {
        if let Some(line) = line {
            if count {
                out.push_str(&format!("{n:7} {line}\n"));
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
    };
    for line in text.lines() {
        if prev == Some(line) {
            run += 1;
        } else {
            flush(prev, run, &mut out);
            prev = Some(line);
            run = 1;
        }
    }
    flush(prev, run, &mut out);
    ExecOutcome::success(out)
}

fn run_tr(args: &[String], stdin: &[u8]) -> ExecOutcome {
    let delete = args.first().is_some_and(|a| a == "-d");
    let sets: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let expand = |s: &str| -> Vec<char> {
        match s {
            "a-z" => ('a'..='z').collect(),
            "A-Z" => ('A'..='Z').collect(),
            "0-9" => ('0'..='9').collect(),
            other => other.chars().collect(),
        }
    };
    let text = String::from_utf8_lossy(stdin);
    if delete {
        let Some(set) = sets.first() else {
            return ExecOutcome::failure(1, "tr: missing operand\n");
        };
        let del = expand(set);
        let out: String = text.chars().filter(|c| !del.contains(c)).collect();
        return ExecOutcome::success(out);
    }
    let (Some(from), Some(to)) = (sets.first(), sets.get(1)) else {
        return ExecOutcome::failure(1, "tr: missing operand\n");
    };
    let from = expand(from);
    let to = expand(to);
    let out: String = text
        .chars()
        .map(|c| match from.iter().position(|&f| f == c) {
            Some(i) => *to.get(i).or(to.last()).unwrap_or(&c),
            None => c,
        })
        .collect();
    ExecOutcome::success(out)
}

fn run_cut(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let mut delim = '\t';
    let mut field: Option<usize> = None;
    let mut files = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(d) = arg.strip_prefix("-d") {
            let d = if d.is_empty() {
                iter.next().map(String::as_str).unwrap_or("\t")
            } else {
                d
            };
            delim = d.chars().next().unwrap_or('\t');
        } else if let Some(f) = arg.strip_prefix("-f") {
            let f = if f.is_empty() {
                iter.next().map(String::as_str).unwrap_or("1")
            } else {
                f
            };
            field = f.parse().ok();
        } else if !arg.starts_with('-') {
            files.push(arg.clone());
        }
    }
    let Some(field) = field else {
        return ExecOutcome::failure(1, "cut: you must specify a list of fields\n");
    };
    let data = match gather_input(&files, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(1, format!("cut: {e}\n")),
    };
    let mut out = String::new();
    for line in String::from_utf8_lossy(&data).lines() {
        let picked = line.split(delim).nth(field.saturating_sub(1)).unwrap_or(line);
        out.push_str(picked);
        out.push('\n');
    }
    ExecOutcome::success(out)
}

fn run_grep(args: &[String], stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let invert = args.iter().any(|a| a == "-v");
    let ignore_case = args.iter().any(|a| a == "-i");
    let count_only = args.iter().any(|a| a == "-c");
    let quiet = args.iter().any(|a| a == "-q");
    let operands: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let Some(pattern) = operands.first() else {
        return ExecOutcome::failure(2, "grep: missing pattern\n");
    };
    let files: Vec<String> = operands[1..].iter().map(|s| s.to_string()).collect();
    let data = match gather_input(&files, stdin, root) {
        Ok(data) => data,
        Err(e) => return ExecOutcome::failure(2, format!("grep: {e}\n")),
    };
    let needle = if ignore_case {
        pattern.to_lowercase()
    } else {
        pattern.to_string()
    };
    let mut matched = 0usize;
    let mut out = String::new();
    for line in String::from_utf8_lossy(&data).lines() {
        let haystack = if ignore_case {
            line.to_lowercase()
        } else {
            line.to_string()
        };
        if haystack.contains(&needle) != invert {
            matched += 1;
            if !count_only && !quiet {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    if count_only {
        out = format!("{matched}\n");
    }
    if matched == 0 {
        return ExecOutcome::failure(1, "");
    }
    ExecOutcome::success(if quiet { String::new() } else { out })
}

fn run_ls(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let long = args.iter().any(|a| a.starts_with('-') && a.contains('l'));
    let all = args.iter().any(|a| a.starts_with('-') && a.contains('a'));
    let target = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(String::as_str)
        .unwrap_or("/");
    let host = root.resolve(target);
    if host.is_file() {
        return ExecOutcome::success(format!("{target}\n"));
    }
    let entries = match std::fs::read_dir(&host) {
        Ok(entries) => entries,
        Err(_) => {
            return ExecOutcome::failure(
                1,
                format!("ls: {target}: No such file or directory\n"),
            )
        }
    };
    let mut names: Vec<(String, u64, bool)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !all && name.starts_with('.') {
                return None;
            }
            let meta = entry.metadata().ok()?;
            Some((name, meta.len(), meta.is_dir()))
        })
        .collect();
    names.sort();
    let mut out = String::new();
    for (name, size, is_dir) in names {
        if long {
            let mode = if is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
            out.push_str(&format!("{mode} 1 root root {size:8} {name}\n"));
        } else {
            out.push_str(&name);
            out.push('\n');
        }
    }
    ExecOutcome::success(out)
}

fn run_mkdir(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let parents = args.iter().any(|a| a == "-p");
    for dir in args.iter().filter(|a| !a.starts_with('-')) {
        let host = root.resolve(dir);
        let result = if parents {
            std::fs::create_dir_all(&host)
        } else {
            std::fs::create_dir(&host)
        };
        if let Err(e) = result {
            return ExecOutcome::failure(1, format!("mkdir: {dir}: {e}\n"));
        }
    }
    ExecOutcome::success("")
}

fn run_rm(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let recursive = args
        .iter()
        .any(|a| a.starts_with('-') && (a.contains('r') || a.contains('R')));
    let force = args.iter().any(|a| a.starts_with('-') && a.contains('f'));
    for target in args.iter().filter(|a| !a.starts_with('-')) {
        let host = root.resolve(target);
        let result = if host.is_dir() {
            if recursive {
                std::fs::remove_dir_all(&host)
            } else {
                return ExecOutcome::failure(1, format!("rm: {target}: is a directory\n"));
            }
        } else {
            std::fs::remove_file(&host)
        };
        if let Err(e) = result {
            if !force {
                return ExecOutcome::failure(1, format!("rm: {target}: {e}\n"));
            }
        }
    }
    ExecOutcome::success("")
}

fn run_rmdir(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    for dir in args.iter().filter(|a| !a.starts_with('-')) {
        if let Err(e) = std::fs::remove_dir(root.resolve(dir)) {
            return ExecOutcome::failure(1, format!("rmdir: {dir}: {e}\n"));
        }
    }
    ExecOutcome::success("")
}

fn copy_target(src: &str, dst_host: std::path::PathBuf) -> std::path::PathBuf {
    if dst_host.is_dir() {
        let base = src.trim_end_matches('/').rsplit('/').next().unwrap_or(src);
        dst_host.join(base)
    } else {
        dst_host
    }
}

fn run_cp(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let recursive = args
        .iter()
        .any(|a| a.starts_with('-') && (a.contains('r') || a.contains('R')));
    let operands: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let [src, dst] = operands.as_slice() else {
        return ExecOutcome::failure(1, "cp: need source and destination\n");
    };
    let src_host = root.resolve(src);
    let dst_host = copy_target(src, root.resolve(dst));
    let result = if src_host.is_dir() {
        if recursive {
            copy_tree(&src_host, &dst_host)
        } else {
            return ExecOutcome::failure(1, format!("cp: {src}: is a directory\n"));
        }
    } else {
        std::fs::copy(&src_host, &dst_host).map(|_| ())
    };
    match result {
        Ok(()) => ExecOutcome::success(""),
        Err(e) => ExecOutcome::failure(1, format!("cp: {e}\n")),
    }
}

/// Rename when possible; mounts may sit on different host filesystems, so
/// files fall back to copy plus unlink.
fn run_mv(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let operands: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let [src, dst] = operands.as_slice() else {
        return ExecOutcome::failure(1, "mv: need source and destination\n");
    };
    let src_host = root.resolve(src);
    let dst_host = copy_target(src, root.resolve(dst));
    if std::fs::rename(&src_host, &dst_host).is_ok() {
        return ExecOutcome::success("");
    }
    if src_host.is_dir() {
        return ExecOutcome::failure(1, format!("mv: cannot move directory {src}\n"));
    }
    let result = std::fs::copy(&src_host, &dst_host)
        .map(|_| ())
        .and_then(|()| std::fs::remove_file(&src_host));
    match result {
        Ok(()) => ExecOutcome::success(""),
        Err(e) => ExecOutcome::failure(1, format!("mv: {e}\n")),
    }
}

fn copy_tree(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)?.flatten() {
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn run_test(name: &str, args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let mut args = args.to_vec();
    if name == "[" {
        if args.last().map(String::as_str) != Some("]") {
            return ExecOutcome::failure(2, "[: missing ']'\n");
        }
        args.pop();
    }
    let truth = eval_test(&args, root);
    if truth {
        ExecOutcome::success("")
    } else {
        ExecOutcome::failure(1, "")
    }
}

fn eval_test(args: &[String], root: &VirtualRoot) -> bool {
    match args {
        [] => false,
        [one] => !one.is_empty(),
        [op, operand] => match op.as_str() {
            "-n" => !operand.is_empty(),
            "-z" => operand.is_empty(),
            "-e" => root.exists(operand),
            "-f" => root.resolve(operand).is_file(),
            "-d" => root.resolve(operand).is_dir(),
            "-s" => root
                .resolve(operand)
                .metadata()
                .map(|m| m.len() > 0)
                .unwrap_or(false),
            "!" => !eval_test(&args[1..], root),
            _ => false,
        },
        [lhs, op, rhs] => {
            if op == "=" || op == "==" {
                return lhs == rhs;
            }
            if op == "!=" {
                return lhs != rhs;
            }
            let (Ok(a), Ok(b)) = (lhs.parse::<i64>(), rhs.parse::<i64>()) else {
                return false;
            };
            match op.as_str() {
                "-eq" => a == b,
                "-ne" => a != b,
                "-lt" => a < b,
                "-le" => a <= b,
                "-gt" => a > b,
                "-ge" => a >= b,
                _ => false,
            }
        }
        _ => {
            if args[0] == "!" {
                return !eval_test(&args[1..], root);
            }
            false
        }
    }
}

fn run_expr(args: &[String]) -> ExecOutcome {
    let [lhs, op, rhs] = args else {
        return ExecOutcome::failure(2, "expr: syntax error\n");
    };
    let (Ok(a), Ok(b)) = (lhs.parse::<i64>(), rhs.parse::<i64>()) else {
        return ExecOutcome::failure(2, "expr: non-integer argument\n");
    };
    let value = match op.as_str() {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" if b != 0 => a / b,
        "%" if b != 0 => a % b,
        "/" | "%" => return ExecOutcome::failure(2, "expr: division by zero\n"),
        _ => return ExecOutcome::failure(2, "expr: syntax error\n"),
    };
    let code = i64::from(value == 0);
    ExecOutcome {
        code,
        stdout: format!("{value}\n").into_bytes(),
        stderr: Vec::new(),
    }
}
