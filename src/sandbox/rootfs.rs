//! Virtual root filesystem.
//!
//! Each sandbox process owns a host temp directory laid out like a
//! minimal Linux root. Bind mounts map container-absolute prefixes onto
//! host directories outside the root; symlinks inside the root mirror
//! them so the shell's own path resolution follows redirects and command
//! substitutions into mounted trees.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};

/// One bind mount: a container-absolute prefix served by a host path.
#[derive(Debug, Clone)]
pub struct DirMount {
    pub container_path: String,
    pub host_path: PathBuf,
    pub read_only: bool,
}

/// A prepared virtual root plus its mount table.
pub struct VirtualRoot {
    dir: TempDir,
    /// Sorted longest-prefix-first so resolution picks the deepest mount.
    mounts: Vec<DirMount>,
}

impl VirtualRoot {
    /// Creates the root skeleton and materializes mounts and symlinks.
    ///
    /// `binds` entries use the engine format `host:container[:ro]`.
    pub fn new(binds: &[String]) -> Result<Self> {
        let dir = TempDir::with_prefix("sockerless-rootfs-")?;
        populate_skeleton(dir.path())?;

        let mut mounts = parse_binds(binds)?;
        // Longest container prefix wins during resolution.
        mounts.sort_by(|a, b| b.container_path.len().cmp(&a.container_path.len()));

        let root = VirtualRoot { dir, mounts };
        root.materialize_symlinks()?;
        Ok(root)
    }

    /// Host path of the root directory.
    pub fn host_root(&self) -> &Path {
        self.dir.path()
    }

    pub fn mounts(&self) -> &[DirMount] {
        &self.mounts
    }

    /// Maps a container-absolute path to its host path, honoring mounts
    /// before falling back to the root directory.
    pub fn resolve(&self, container_path: &str) -> PathBuf {
        let normalized = normalize(container_path);
        for mount in &self.mounts {
            if let Some(rest) = strip_prefix(&normalized, &mount.container_path) {
                return mount.host_path.join(rest);
            }
        }
        self.dir.path().join(normalized.trim_start_matches('/'))
    }

    /// True when a container path names an existing host file or dir.
    pub fn exists(&self, container_path: &str) -> bool {
        self.resolve(container_path).exists()
    }

    /// Total bytes under the root, for stats reporting.
    pub fn disk_usage(&self) -> u64 {
        dir_size(self.dir.path())
    }

    /// Creates symlinks inside the root pointing at each mount's host
    /// path, skipping mounts nested under another mount.
    fn materialize_symlinks(&self) -> Result<()> {
        for (i, mount) in self.mounts.iter().enumerate() {
            let nested = self.mounts.iter().enumerate().any(|(j, outer)| {
                i != j && strip_prefix(&mount.container_path, &outer.container_path).is_some()
            });
            if nested {
                continue;
            }
            let link = self
                .dir
                .path()
                .join(mount.container_path.trim_start_matches('/'));
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if link.exists() || link.is_symlink() {
                continue;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&mount.host_path, &link)?;
            debug!(
                container = %mount.container_path,
                host = %mount.host_path.display(),
                "mount symlinked into virtual root"
            );
        }
        Ok(())
    }
}

/// Lays down the minimal Linux-like skeleton.
fn populate_skeleton(root: &Path) -> Result<()> {
    for dir in [
        "bin",
        "sbin",
        "usr/bin",
        "usr/sbin",
        "usr/local/bin",
        "etc",
        "tmp",
        "var/tmp",
        "var/log",
        "dev",
        "home",
        "root",
        "proc",
        "sys",
    ] {
        std::fs::create_dir_all(root.join(dir))?;
    }

    std::fs::write(
        root.join("etc/passwd"),
        "root:x:0:0:root:/root:/bin/sh\nnobody:x:65534:65534:nobody:/:/sbin/nologin\n",
    )?;
    std::fs::write(root.join("etc/group"), "root:x:0:\nnobody:x:65534:\n")?;
    std::fs::write(root.join("etc/hostname"), "sandbox\n")?;
    std::fs::write(
        root.join("etc/hosts"),
        "127.0.0.1\tlocalhost\n::1\tlocalhost\n",
    )?;
    std::fs::write(root.join("etc/resolv.conf"), "nameserver 127.0.0.11\n")?;
    std::fs::write(root.join("dev/null"), b"")?;
    Ok(())
}

fn parse_binds(binds: &[String]) -> Result<Vec<DirMount>> {
    let mut mounts = Vec::with_capacity(binds.len());
    for bind in binds {
        let parts: Vec<&str> = bind.split(':').collect();
        if parts.len() < 2 || parts[0].is_empty() || !parts[1].starts_with('/') {
            return Err(Error::InvalidParameter(format!("malformed bind: {bind}")));
        }
        mounts.push(DirMount {
            host_path: PathBuf::from(parts[0]),
            container_path: normalize(parts[1]),
            read_only: parts.get(2).is_some_and(|opts| opts.contains("ro")),
        });
    }
    Ok(mounts)
}

/// Collapses `.` segments and duplicate slashes; resolves `..` lexically.
fn normalize(path: &str) -> String {
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
    let joined = out.join("/");
    format!("/{joined}")
}

/// Returns the remainder of `path` under `prefix`, or `None`.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let Ok(meta) = entry.metadata() else { return 0 };
            if meta.is_dir() {
                dir_size(&entry.path())
            } else {
                meta.len()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_exists_after_construction() {
        let root = VirtualRoot::new(&[]).unwrap();
        for path in ["bin", "etc/passwd", "dev/null", "tmp", "proc", "sys"] {
            assert!(
                root.host_root().join(path).exists(),
                "skeleton entry {path} missing"
            );
        }
        let passwd = std::fs::read_to_string(root.host_root().join("etc/passwd")).unwrap();
        assert!(passwd.contains("root:x:0:0"));
    }

    #[test]
    fn resolution_prefers_deepest_mount() {
        let outer = TempDir::new().unwrap();
        let inner = TempDir::new().unwrap();
        let binds = vec![
            format!("{}:/data", outer.path().display()),
            format!("{}:/data/sub", inner.path().display()),
        ];
        let root = VirtualRoot::new(&binds).unwrap();

        assert_eq!(root.resolve("/data/a.txt"), outer.path().join("a.txt"));
        assert_eq!(root.resolve("/data/sub/b.txt"), inner.path().join("b.txt"));
        assert_eq!(
            root.resolve("/tmp/x"),
            root.host_root().join("tmp/x"),
            "unmounted paths land in the root"
        );
    }

    #[test]
    fn dot_segments_resolve_lexically() {
        let root = VirtualRoot::new(&[]).unwrap();
        assert_eq!(
            root.resolve("/tmp/../etc/./passwd"),
            root.host_root().join("etc/passwd")
        );
        assert_eq!(
            root.resolve("/../../etc"),
            root.host_root().join("etc"),
            "leading .. cannot escape the root"
        );
    }

    #[test]
    fn malformed_binds_rejected() {
        assert!(VirtualRoot::new(&["nocolon".to_string()]).is_err());
        assert!(VirtualRoot::new(&["/host:relative".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn mounts_are_symlinked_into_root() {
        let data = TempDir::new().unwrap();
        std::fs::write(data.path().join("f.txt"), "x").unwrap();
        let binds = vec![format!("{}:/data", data.path().display())];
        let root = VirtualRoot::new(&binds).unwrap();

        let link = root.host_root().join("data");
        assert!(link.is_symlink(), "mount should appear as symlink");
        assert!(link.join("f.txt").exists(), "symlink reaches mount content");
    }

    #[test]
    fn read_only_flag_parsed() {
        let data = TempDir::new().unwrap();
        let binds = vec![format!("{}:/data:ro", data.path().display())];
        let root = VirtualRoot::new(&binds).unwrap();
        assert!(root.mounts()[0].read_only);
    }
}
