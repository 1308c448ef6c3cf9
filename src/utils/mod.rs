use base64::prelude::*;
use url::Url;

/// Windows 保留设备名，命中时需要加前缀避让
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 从起始 URL 提取主机名，作为站点的磁盘目录键
///
/// 解析失败时回退为 "default"。
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "default".to_string())
}

/// 规范化链接路径，作为进度与免费记录的主键
///
/// 丢弃 query/fragment，去除首尾斜杠。
pub fn normalize_path(link: &str) -> String {
    let link = link.trim();
    let link = link.split(['?', '#']).next().unwrap_or(link);
    link.trim_matches('/').to_string()
}

/// 计算文本中所有数字段之和
///
/// "5 blocks" -> Some(5)，"12 + 3" -> Some(15)，无数字段返回 None。
pub fn sum_digit_runs(text: &str) -> Option<u32> {
    let mut total: u32 = 0;
    let mut current: Option<u32> = None;
    let mut seen = false;

    for ch in text.chars() {
        if let Some(d) = ch.to_digit(10) {
            seen = true;
            current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(d));
        } else if let Some(run) = current.take() {
            total = total.saturating_add(run);
        }
    }
    if let Some(run) = current {
        total = total.saturating_add(run);
    }

    seen.then_some(total)
}

/// 取文本中首个非空行（修剪后）
pub fn first_text_fragment(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// 清洗单个文件名段，保证跨平台可写
///
/// 幂等：sanitize(sanitize(x)) == sanitize(x)。空结果回退为原文的 URL-safe 摘要。
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('-'),
            c if (c as u32) < 0x20 => out.push('-'),
            c => out.push(c),
        }
    }
    let trimmed = out.trim().trim_end_matches(['.', ' ']).to_string();

    if trimmed.is_empty() {
        let mut hash = BASE64_URL_SAFE_NO_PAD.encode(name.as_bytes());
        hash.truncate(16);
        return hash;
    }

    let stem = trimmed.split('.').next().unwrap_or(&trimmed);
    if RESERVED_NAMES.contains(&stem.to_ascii_uppercase().as_str()) {
        return format!("_{}", trimmed);
    }
    trimmed
}

/// 清洗相对路径形式的文件名（逐段处理，保留目录结构）
pub fn sanitize_rel_path(name: &str) -> String {
    name.split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// 检测是否处于调试模式（沿用 Playwright 系工具的环境变量约定）
pub fn is_debug_mode() -> bool {
    ["PWDEBUG", "PW_TEST_DEBUG", "PLAYWRIGHT_INSPECTOR"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_falls_back_to_default() {
        assert_eq!(host_of("https://ui.example.dev/blocks"), "ui.example.dev");
        assert_eq!(host_of("not a url"), "default");
    }

    #[test]
    fn normalize_strips_slashes_and_query() {
        assert_eq!(normalize_path("/components/buttons/"), "components/buttons");
        assert_eq!(normalize_path("/a?page=2#top"), "a");
        assert_eq!(normalize_path("a"), "a");
    }

    #[test]
    fn digit_runs_are_summed() {
        assert_eq!(sum_digit_runs("5 blocks"), Some(5));
        assert_eq!(sum_digit_runs("12 free + 3 pro"), Some(15));
        assert_eq!(sum_digit_runs("no blocks"), None);
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["a<b>c", "CON.tsx", "  dots..", "normal-name.tsx", "??"] {
            let once = sanitize_segment(raw);
            assert_eq!(sanitize_segment(&once), once, "not stable for {raw:?}");
        }
    }

    #[test]
    fn sanitize_keeps_path_shape() {
        assert_eq!(
            sanitize_rel_path("sub/dir/file.tsx"),
            "sub/dir/file.tsx".to_string()
        );
        assert_eq!(sanitize_rel_path("../escape/x.ts"), "escape/x.ts");
    }

    #[test]
    fn reserved_names_are_prefixed() {
        assert_eq!(sanitize_segment("CON.tsx"), "_CON.tsx");
        assert_eq!(sanitize_segment("aux"), "_aux");
    }
}
