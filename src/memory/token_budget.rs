//! Token 估算与截断
//!
//! 不依赖分词器的近似估算：ASCII 约 4 字符/token，非 ASCII（中文等）约 1.5 字符/token。
//! 上下文压缩阈值与工具输出截断都以此为准。

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(text: &str) -> usize {
        let (ascii, non_ascii) = text.chars().fold((0usize, 0usize), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
        let tokens = ascii.div_ceil(4) + (non_ascii as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 多段文本之和
    pub fn estimate_all<'a, I>(texts: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(Self::estimate).sum()
    }
}

/// 按字符数截断并标注，保证不切断 UTF-8 字符
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n...[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_token_estimator_chinese() {
        let text = "你好世界，这是一个测试。";
        assert_eq!(TokenEstimator::estimate(text), 8);
    }

    #[test]
    fn test_estimate_all_sums() {
        assert_eq!(TokenEstimator::estimate_all(["abcd", "abcd"]), 2);
        assert_eq!(TokenEstimator::estimate(""), 1);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        let out = truncate_chars("你好世界", 2);
        assert!(out.starts_with("你好"));
        assert!(out.ends_with("[truncated]"));
    }
}
