// 展示用格式化工具

const SIZE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// 未知 ETA 的占位符
pub const UNKNOWN_ETA: &str = "~";

/// 字节数转为可读字符串，如 `1.50MB`
pub fn readable_file_size(bytes: f64) -> String {
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0B".to_string();
    }

    let mut size = bytes;
    let mut index = 0;
    while size >= 1024.0 && index < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        index += 1;
    }

    format!("{:.2}{}", size, SIZE_UNITS[index])
}

/// 秒数转为可读时长，如 `1d2h3m4s`
pub fn readable_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return UNKNOWN_ETA.to_string();
    }

    let mut remaining = seconds as u64;
    let mut result = String::new();
    for (name, period) in [("d", 86_400u64), ("h", 3_600), ("m", 60), ("s", 1)] {
        if remaining >= period {
            let value = remaining / period;
            remaining %= period;
            result.push_str(&format!("{}{}", value, name));
        }
    }

    if result.is_empty() {
        "0s".to_string()
    } else {
        result
    }
}

/// 百分比字符串，保留两位小数；分母为 0 时返回 `0%`
pub fn percent_string(done: f64, total: f64) -> String {
    if total <= 0.0 || !done.is_finite() {
        return "0%".to_string();
    }
    format!("{:.2}%", (done / total * 100.0).clamp(0.0, 100.0))
}

/// 剩余时间；速度未知或为 0 时返回占位符
pub fn eta_string(remaining_bytes: f64, speed: f64) -> String {
    if speed <= 0.0 || !speed.is_finite() || remaining_bytes < 0.0 {
        return UNKNOWN_ETA.to_string();
    }
    readable_time(remaining_bytes / speed)
}

/// 去掉尖括号，错误消息会被前端按标记语言渲染
pub fn sanitize_message(message: &str) -> String {
    message.replace(['<', '>'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_file_size() {
        assert_eq!(readable_file_size(0.0), "0B");
        assert_eq!(readable_file_size(512.0), "512.00B");
        assert_eq!(readable_file_size(1536.0), "1.50KB");
        assert_eq!(readable_file_size(5.0 * 1024.0 * 1024.0 * 1024.0), "5.00GB");
    }

    #[test]
    fn test_readable_time() {
        assert_eq!(readable_time(0.0), "0s");
        assert_eq!(readable_time(8.0), "8s");
        assert_eq!(readable_time(3_725.0), "1h2m5s");
        assert_eq!(readable_time(90_061.0), "1d1h1m1s");
    }

    #[test]
    fn test_defensive_percent_and_eta() {
        assert_eq!(percent_string(10.0, 0.0), "0%");
        assert_eq!(percent_string(25.0, 100.0), "25.00%");
        assert_eq!(eta_string(100.0, 0.0), UNKNOWN_ETA);
        assert_eq!(eta_string(100.0, 10.0), "10s");
    }

    #[test]
    fn test_sanitize_message() {
        assert_eq!(
            sanitize_message("<HttpError 404 when requesting x>"),
            "HttpError 404 when requesting x"
        );
    }
}
