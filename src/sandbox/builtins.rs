//! Native host builtins.
//!
//! Commands the sandbox answers without touching the Wasm module: WASI
//! lacks the capability (hostname, id), the output must be deterministic
//! (date, uname), or path semantics must stay inside the virtual root
//! (readlink, mktemp). Each builtin resolves its own paths against the
//! root; applet-style argv rewriting does not apply here.

use base64::Engine as _;
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::applets::{absolutize, is_host_builtin, is_known_applet, is_shell};
use super::rootfs::VirtualRoot;
use super::wasm::ExecOutcome;

/// Runs a host builtin. Callers must check [`is_host_builtin`] first.
pub fn run_host_builtin(
    name: &str,
    args: &[String],
    env: &[(String, String)],
    cwd: &str,
    stdin: &[u8],
    root: &VirtualRoot,
) -> Result<ExecOutcome> {
    let outcome = match name {
        "pwd" => {
            let pwd = env
                .iter()
                .find(|(k, _)| k == "PWD")
                .map(|(_, v)| v.as_str())
                .unwrap_or(cwd);
            ExecOutcome::success(format!("{pwd}\n"))
        }
        "hostname" => ExecOutcome::success("sandbox\n"),
        "id" => run_id(args),
        "uname" => run_uname(args),
        "date" => run_date(args),
        "env" => {
            let mut out = String::new();
            for (k, v) in env {
                out.push_str(&format!("{k}={v}\n"));
            }
            ExecOutcome::success(out)
        }
        "basename" => match args.first() {
            Some(path) => {
                let base = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
                let base = match args.get(1) {
                    Some(suffix) if base != suffix.as_str() => {
                        base.strip_suffix(suffix.as_str()).unwrap_or(base)
                    }
                    _ => base,
                };
                ExecOutcome::success(format!("{base}\n"))
            }
            None => ExecOutcome::failure(1, "basename: missing operand\n"),
        },
        "dirname" => match args.first() {
            Some(path) => {
                let trimmed = path.trim_end_matches('/');
                let dir = match trimmed.rfind('/') {
                    Some(0) => "/",
                    Some(idx) => &trimmed[..idx],
                    None => ".",
                };
                ExecOutcome::success(format!("{dir}\n"))
            }
            None => ExecOutcome::failure(1, "dirname: missing operand\n"),
        },
        "which" => run_which(args),
        "seq" => run_seq(args),
        "touch" => run_touch(args, cwd, root),
        "mktemp" => run_mktemp(args, root),
        "base64" => run_base64(args, cwd, stdin, root),
        "readlink" => run_readlink(args, cwd, root),
        "tee" => run_tee(args, cwd, stdin, root),
        "ln" => run_ln(args, cwd, root),
        "stat" => run_stat(args, cwd, root),
        "sha256sum" => run_checksum::<Sha256>(args, cwd, stdin, root),
        "md5sum" => run_checksum::<Md5>(args, cwd, stdin, root),
        other => ExecOutcome::failure(127, format!("sh: {other}: not found\n")),
    };
    Ok(outcome)
}

fn run_id(args: &[String]) -> ExecOutcome {
    match args.first().map(String::as_str) {
        Some("-u") => ExecOutcome::success("0\n"),
        Some("-g") => ExecOutcome::success("0\n"),
        Some("-un") | Some("-gn") => ExecOutcome::success("root\n"),
        _ => ExecOutcome::success("uid=0(root) gid=0(root) groups=0(root)\n"),
    }
}

fn run_uname(args: &[String]) -> ExecOutcome {
    let out = match args.first().map(String::as_str) {
        Some("-a") => "Linux sandbox 6.1.0 #1 SMP wasm32 GNU/Linux",
        Some("-n") => "sandbox",
        Some("-r") => "6.1.0",
        Some("-m") => "wasm32",
        Some("-o") => "GNU/Linux",
        _ => "Linux",
    };
    ExecOutcome::success(format!("{out}\n"))
}

fn run_date(args: &[String]) -> ExecOutcome {
    let now = chrono::Utc::now();
    if let Some(fmt) = args.first().and_then(|a| a.strip_prefix('+')) {
        if fmt_is_safe(fmt) {
            return ExecOutcome::success(format!("{}\n", now.format(fmt)));
        }
        return ExecOutcome::failure(1, format!("date: invalid format '{fmt}'\n"));
    }
    ExecOutcome::success(format!("{}\n", now.format("%a %b %e %H:%M:%S UTC %Y")))
}

/// Rejects format strings with specifiers chrono cannot render, which
/// would otherwise abort mid-Display.
fn fmt_is_safe(fmt: &str) -> bool {
    const KNOWN: &str = "YmdHMSsjaAbBeTDFRZz%";
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some(spec) if KNOWN.contains(spec) => {}
                _ => return false,
            }
        }
    }
    true
}

fn run_which(args: &[String]) -> ExecOutcome {
    let Some(name) = args.first() else {
        return ExecOutcome::failure(1, "");
    };
    let bare = name.rsplit('/').next().unwrap_or(name);
    if is_host_builtin(bare) || is_known_applet(bare) || is_shell(bare) {
        ExecOutcome::success(format!("/bin/{bare}\n"))
    } else {
        ExecOutcome::failure(1, "")
    }
}

fn run_seq(args: &[String]) -> ExecOutcome {
    let nums: Vec<i64> = args.iter().filter_map(|a| a.parse().ok()).collect();
    if nums.is_empty() || nums.len() != args.len() {
        return ExecOutcome::failure(1, "seq: invalid arguments\n");
    }
    let (first, step, last) = match nums.len() {
        1 => (1, 1, nums[0]),
        2 => (nums[0], 1, nums[1]),
        _ => (nums[0], nums[1], nums[2]),
    };
    if step == 0 {
        return ExecOutcome::failure(1, "seq: step cannot be zero\n");
    }
    let mut out = String::new();
    let mut n = first;
    while (step > 0 && n <= last) || (step < 0 && n >= last) {
        out.push_str(&format!("{n}\n"));
        n += step;
    }
    ExecOutcome::success(out)
}

fn run_touch(args: &[String], cwd: &str, root: &VirtualRoot) -> ExecOutcome {
    for arg in args.iter().filter(|a| !a.starts_with('-')) {
        let host = root.resolve(&absolutize(cwd, arg));
        if host.exists() {
            continue;
        }
        if let Some(parent) = host.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&host, b"") {
            return ExecOutcome::failure(1, format!("touch: {arg}: {e}\n"));
        }
    }
    ExecOutcome::success("")
}

fn run_mktemp(args: &[String], root: &VirtualRoot) -> ExecOutcome {
    let want_dir = args.iter().any(|a| a == "-d");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let container_path = format!("/tmp/tmp.{}", &suffix[..8]);
    let host = root.resolve(&container_path);
    let result = if want_dir {
        std::fs::create_dir(&host)
    } else {
        std::fs::write(&host, b"")
    };
    match result {
        Ok(()) => ExecOutcome::success(format!("{container_path}\n")),
        Err(e) => ExecOutcome::failure(1, format!("mktemp: {e}\n")),
    }
}

fn run_base64(args: &[String], cwd: &str, stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let decode = args.iter().any(|a| a == "-d" || a == "--decode");
    let input = match args.iter().find(|a| !a.starts_with('-')) {
        Some(file) => match std::fs::read(root.resolve(&absolutize(cwd, file))) {
            Ok(bytes) => bytes,
            Err(e) => return ExecOutcome::failure(1, format!("base64: {file}: {e}\n")),
        },
        None => stdin.to_vec(),
    };
    if decode {
        let text: String = input
            .iter()
            .map(|&b| b as char)
            .filter(|c| !c.is_whitespace())
            .collect();
        match base64::engine::general_purpose::STANDARD.decode(text) {
            Ok(bytes) => ExecOutcome {
                code: 0,
                stdout: bytes,
                stderr: Vec::new(),
            },
            Err(_) => ExecOutcome::failure(1, "base64: invalid input\n"),
        }
    } else {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&input);
        ExecOutcome::success(format!("{encoded}\n"))
    }
}

fn run_readlink(args: &[String], cwd: &str, root: &VirtualRoot) -> ExecOutcome {
    let canonical = args.iter().any(|a| a == "-f");
    let Some(target) = args.iter().find(|a| !a.starts_with('-')) else {
        return ExecOutcome::failure(1, "readlink: missing operand\n");
    };
    let container_path = absolutize(cwd, target);
    if canonical {
        // Canonical form stays a container path; never leak the host root.
        return ExecOutcome::success(format!("{container_path}\n"));
    }
    match std::fs::read_link(root.resolve(&container_path)) {
        Ok(dest) => ExecOutcome::success(format!("{}\n", dest.display())),
        Err(_) => ExecOutcome::failure(1, ""),
    }
}

fn run_tee(args: &[String], cwd: &str, stdin: &[u8], root: &VirtualRoot) -> ExecOutcome {
    let append = args.iter().any(|a| a == "-a");
    for file in args.iter().filter(|a| !a.starts_with('-')) {
        let host = root.resolve(&absolutize(cwd, file));
        let result = if append {
            use std::io::Write;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&host)
                .and_then(|mut f| f.write_all(stdin))
        } else {
            std::fs::write(&host, stdin)
        };
        if let Err(e) = result {
            return ExecOutcome::failure(1, format!("tee: {file}: {e}\n"));
        }
    }
    ExecOutcome {
        code: 0,
        stdout: stdin.to_vec(),
        stderr: Vec::new(),
    }
}

fn run_ln(args: &[String], cwd: &str, root: &VirtualRoot) -> ExecOutcome {
    let symbolic = args.iter().any(|a| a == "-s" || a == "-sf" || a == "-fs");
    let operands: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    if operands.len() != 2 {
        return ExecOutcome::failure(1, "ln: need target and link name\n");
    }
    if !symbolic {
        return ExecOutcome::failure(1, "ln: hard links not supported\n");
    }
    let target_host = root.resolve(&absolutize(cwd, operands[0]));
    let link_host = root.resolve(&absolutize(cwd, operands[1]));
    let _ = std::fs::remove_file(&link_host);
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(&target_host, &link_host);
    #[cfg(not(unix))]
    let result = Err(std::io::Error::other("symlinks unsupported"));
    match result {
        Ok(()) => ExecOutcome::success(""),
        Err(e) => ExecOutcome::failure(1, format!("ln: {e}\n")),
    }
}

fn run_stat(args: &[String], cwd: &str, root: &VirtualRoot) -> ExecOutcome {
    let format = args
        .iter()
        .position(|a| a == "-c")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let Some(target) = args
        .iter()
        .enumerate()
        .filter(|(i, a)| {
            !a.starts_with('-')
                && !matches!(
                    i.checked_sub(1).and_then(|p| args.get(p)),
                    Some(prev) if prev == "-c"
                )
        })
        .map(|(_, a)| a)
        .next()
    else {
        return ExecOutcome::failure(1, "stat: missing operand\n");
    };

    let container_path = absolutize(cwd, target);
    let meta = match std::fs::metadata(root.resolve(&container_path)) {
        Ok(meta) => meta,
        Err(_) => {
            return ExecOutcome::failure(
                1,
                format!("stat: cannot stat '{target}': No such file or directory\n"),
            )
        }
    };
    let kind = if meta.is_dir() {
        "directory"
    } else {
        "regular file"
    };

    match format {
        Some(fmt) => {
            let rendered = fmt
                .replace("%s", &meta.len().to_string())
                .replace("%n", &container_path)
                .replace("%F", kind);
            ExecOutcome::success(format!("{rendered}\n"))
        }
        None => ExecOutcome::success(format!(
            "  File: {container_path}\n  Size: {}\t{kind}\n",
            meta.len()
        )),
    }
}

fn run_checksum<D: Digest>(
    args: &[String],
    cwd: &str,
    stdin: &[u8],
    root: &VirtualRoot,
) -> ExecOutcome {
    let files: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let mut out = String::new();
    if files.is_empty() {
        out.push_str(&format!("{}  -\n", hex_digest::<D>(stdin)));
    } else {
        for file in files {
            match std::fs::read(root.resolve(&absolutize(cwd, file))) {
                Ok(bytes) => out.push_str(&format!("{}  {file}\n", hex_digest::<D>(&bytes))),
                Err(e) => return ExecOutcome::failure(1, format!("{file}: {e}\n")),
            }
        }
    }
    ExecOutcome::success(out)
}

fn hex_digest<D: Digest>(data: &[u8]) -> String {
    let mut hasher = D::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
