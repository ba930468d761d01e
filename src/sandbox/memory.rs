//! Resident-memory probe for host processes, sampled by pid

/// Current resident set size of `pid` in bytes, `None` once the process is gone
#[cfg(target_os = "linux")]
pub async fn resident_bytes(pid: u32) -> Option<u64> {
    let status = tokio::fs::read_to_string(format!("/proc/{pid}/status"))
        .await
        .ok()?;
    parse_vmrss_bytes(&status)
}

/// Fallback for unix hosts without procfs, one `ps` spawn per sample
#[cfg(not(target_os = "linux"))]
pub async fn resident_bytes(pid: u32) -> Option<u64> {
    let output = tokio::process::Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_ps_rss_bytes(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts the `VmRSS:` line of /proc/<pid>/status, reported in kB
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vmrss_bytes(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kilobytes: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kilobytes * 1024)
}

/// Parses the bare-number `rss=` column of ps output, reported in kB
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn parse_ps_rss_bytes(output: &str) -> Option<u64> {
    let kilobytes: u64 = output.trim().parse().ok()?;
    Some(kilobytes * 1024)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn vmrss_line_is_parsed_in_bytes() {
        let status = "Name:\tjava\nVmPeak:\t  10240 kB\nVmRSS:\t   2048 kB\nThreads:\t12\n";
        assert_eq!(parse_vmrss_bytes(status), Some(2048 * 1024));
    }

    #[test]
    fn missing_or_mangled_vmrss_yields_none() {
        assert_eq!(parse_vmrss_bytes("Name:\tjava\n"), None);
        assert_eq!(parse_vmrss_bytes("VmRSS:\n"), None);
        assert_eq!(parse_vmrss_bytes("VmRSS:\tlots kB\n"), None);
    }

    #[test]
    fn ps_column_is_parsed_in_bytes() {
        assert_eq!(parse_ps_rss_bytes("  1536\n"), Some(1536 * 1024));
        assert_eq!(parse_ps_rss_bytes(""), None);
        assert_eq!(parse_ps_rss_bytes("RSS\n"), None);
    }

    #[tokio::test]
    async fn own_process_has_measurable_rss() {
        let rss = resident_bytes(std::process::id()).await;
        assert!(rss.is_some_and(|bytes| bytes > 0));
    }

    #[tokio::test]
    async fn vanished_pid_yields_none() {
        // Pids wrap far below this on every mainstream kernel
        assert_eq!(resident_bytes(u32::MAX - 1).await, None);
    }
}
