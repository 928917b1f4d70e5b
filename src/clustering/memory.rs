//! パラメータサーチ前のメモリガード用ユーティリティ。

use std::fs;

/// /proc/self/status から現在の常駐メモリをMB単位で読む。
/// 取得できないプラットフォームでは `None`（ガードは発動しない）。
pub(crate) fn rss_mb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    for line in status.lines() {
        if let Some(value) = line.strip_prefix("VmRSS:") {
            return value
                .split_whitespace()
                .next()
                .and_then(|raw| raw.parse::<u64>().ok());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_rss_line() {
        let status = "VmPeak:\t  204800 kB\nVmRSS:\t  102400 kB\nVmHWM:\t  204800 kB\n";
        assert_eq!(parse_vm_rss_kb(status), Some(102_400));
    }

    #[test]
    fn missing_vm_rss_returns_none() {
        assert_eq!(parse_vm_rss_kb("VmPeak:\t 1 kB\n"), None);
    }
}
