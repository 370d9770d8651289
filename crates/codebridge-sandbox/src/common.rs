//! Process monitoring helpers shared by the engine and backends.

/// Memory check interval in milliseconds
pub const MEMORY_CHECK_INTERVAL_MS: u64 = 100;

/// How long output readers may keep draining after the process is gone.
pub const READER_GRACE_MS: u64 = 2000;

/// Extra address space granted on top of the RSS ceiling for `RLIMIT_AS`
/// (shared libraries and allocator arenas count against it).
pub const ADDRESS_SPACE_HEADROOM_MB: u64 = 64;

/// RSS of a single process in bytes, from `/proc/<pid>/status` VmRSS.
#[cfg(target_os = "linux")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb = rest.split_whitespace().next()?.parse::<u64>().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}

/// Parent pid from a `/proc/<pid>/stat` line. The command name may contain
/// spaces and parentheses, so parsing starts after the last `)`.
pub(crate) fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// `root` plus every live descendant.
#[cfg(target_os = "linux")]
pub fn process_tree(root: u32) -> Vec<u32> {
    use std::collections::HashMap;

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    if let Ok(entries) = std::fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
                continue;
            };
            if let Some(ppid) = parse_stat_ppid(&stat) {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }

    let mut tree = vec![root];
    let mut i = 0;
    while i < tree.len() {
        if let Some(kids) = children.get(&tree[i]) {
            let fresh: Vec<u32> = kids.iter().copied().filter(|k| !tree.contains(k)).collect();
            tree.extend(fresh);
        }
        i += 1;
    }
    tree
}

#[cfg(not(target_os = "linux"))]
pub fn process_tree(root: u32) -> Vec<u32> {
    vec![root]
}

/// Summed RSS of the whole process tree rooted at `root`.
pub fn process_tree_rss(root: u32) -> Option<u64> {
    let tree = process_tree(root);
    let mut total = 0u64;
    let mut seen_any = false;
    for pid in tree {
        if let Some(rss) = get_process_memory(pid) {
            total += rss;
            seen_any = true;
        }
    }
    seen_any.then_some(total)
}

/// SIGKILL the process group led by `pid` and every descendant found in
/// `/proc`. Processes that already exited are ignored. Call this before `pid`
/// is reaped; afterwards the number may belong to an unrelated process.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let descendants = process_tree(pid);
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    for p in descendants {
        let _ = kill(Pid::from_raw(p as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_process_tree(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_ppid() {
        assert_eq!(parse_stat_ppid("1234 (python3) S 42 1234 1234 0 -1"), Some(42));
        assert_eq!(
            parse_stat_ppid("77 (weird) name (x)) R 9 77 77 0 -1"),
            Some(9)
        );
        assert_eq!(parse_stat_ppid("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_memory_is_visible() {
        let me = std::process::id();
        assert!(get_process_memory(me).unwrap_or(0) > 0);
        assert!(process_tree(me).contains(&me));
        assert!(process_tree_rss(me).unwrap_or(0) > 0);
    }
}
