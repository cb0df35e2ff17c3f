//! Arabic-numeral rewriting for synthesis text.
//!
//! TTS engines read raw digits unpredictably, so every numeric token in the
//! target text is rewritten into Chinese numeral words before synthesis.
//! Two reading rules apply: digit-by-digit (二零二五) for years and long
//! digit runs, place-value (一百二十三) for everything else.

use once_cell::sync::Lazy;
use regex::Regex;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)%").expect("percent regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})年").expect("year regex"));
static LONG_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5,}").expect("long digits regex"));
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.?\d*").expect("number regex"));

const DIGITS: [char; 10] = ['零', '一', '二', '三', '四', '五', '六', '七', '八', '九'];

/// Rewrite every numeric token in `text` into Chinese numeral words.
///
/// Rules apply in order: percentages, 4-digit years, digit runs of length
/// five or more, then all remaining numbers.
pub fn convert_numbers(text: &str) -> String {
    let text = PERCENT_RE.replace_all(text, |caps: &regex::Captures| {
        format!("百分之{}", number_reading(&caps[1]))
    });
    let text = YEAR_RE.replace_all(&text, |caps: &regex::Captures| {
        format!("{}年", digit_reading(&caps[1]))
    });
    let text = LONG_DIGITS_RE.replace_all(&text, |caps: &regex::Captures| digit_reading(&caps[0]));
    let text = NUMBER_RE.replace_all(&text, |caps: &regex::Captures| number_reading(&caps[0]));
    text.into_owned()
}

/// Digit-by-digit reading: "2025" → 二零二五.
fn digit_reading(s: &str) -> String {
    s.chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| DIGITS[d as usize])
        .collect()
}

/// Place-value reading: "100" → 一百, "3.5" → 三点五.
fn number_reading(s: &str) -> String {
    match s.split_once('.') {
        Some((int_part, dec_part)) => {
            let n: u64 = int_part.parse().unwrap_or(0);
            format!("{}点{}", int_reading(n), digit_reading(dec_part))
        }
        None => int_reading(s.parse().unwrap_or(0)),
    }
}

/// Place-value integer reading over 亿/万/千/百/十 groups, eliding internal
/// zeros once per group boundary.
fn int_reading(n: u64) -> String {
    if n == 0 {
        return DIGITS[0].to_string();
    }

    let mut n = n;
    let mut result = String::new();

    if n >= 100_000_000 {
        result.push_str(&int_reading(n / 100_000_000));
        result.push('亿');
        n %= 100_000_000;
        if n > 0 && n < 10_000_000 {
            result.push(DIGITS[0]);
        }
    }
    if n >= 10_000 {
        result.push_str(&int_reading(n / 10_000));
        result.push('万');
        n %= 10_000;
        if n > 0 && n < 1_000 {
            result.push(DIGITS[0]);
        }
    }
    if n >= 1_000 {
        result.push(DIGITS[(n / 1_000) as usize]);
        result.push('千');
        n %= 1_000;
        if n > 0 && n < 100 {
            result.push(DIGITS[0]);
        }
    }
    if n >= 100 {
        result.push(DIGITS[(n / 100) as usize]);
        result.push('百');
        n %= 100;
        if n > 0 && n < 10 {
            result.push(DIGITS[0]);
        }
    }
    if n >= 10 {
        // Leading 10-19 reads 十X, not 一十X
        if n / 10 == 1 && result.is_empty() {
            result.push('十');
        } else {
            result.push(DIGITS[(n / 10) as usize]);
            result.push('十');
        }
        n %= 10;
    }
    if n > 0 {
        result.push(DIGITS[n as usize]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_reading_basic() {
        assert_eq!(int_reading(0), "零");
        assert_eq!(int_reading(7), "七");
        assert_eq!(int_reading(10), "十");
        assert_eq!(int_reading(14), "十四");
        assert_eq!(int_reading(20), "二十");
        assert_eq!(int_reading(100), "一百");
        assert_eq!(int_reading(110), "一百一十");
    }

    #[test]
    fn test_int_reading_zero_elision() {
        assert_eq!(int_reading(105), "一百零五");
        assert_eq!(int_reading(1005), "一千零五");
        assert_eq!(int_reading(10_005), "一万零五");
        assert_eq!(int_reading(10_500), "一万零五百");
        assert_eq!(int_reading(100_000_005), "一亿零五");
    }

    #[test]
    fn test_int_reading_large() {
        assert_eq!(int_reading(12_345), "一万二千三百四十五");
        assert_eq!(int_reading(100_000_000), "一亿");
        assert_eq!(int_reading(123_456_789), "一亿二千三百四十五万六千七百八十九");
    }

    #[test]
    fn test_number_reading_decimal() {
        assert_eq!(number_reading("3.5"), "三点五");
        assert_eq!(number_reading("12.05"), "十二点零五");
    }

    #[test]
    fn test_convert_percent() {
        assert_eq!(convert_numbers("涨了50%"), "涨了百分之五十");
        assert_eq!(convert_numbers("只有0.5%"), "只有百分之零点五");
    }

    #[test]
    fn test_convert_year() {
        assert_eq!(convert_numbers("2025年的事"), "二零二五年的事");
    }

    #[test]
    fn test_convert_long_run_reads_by_digit() {
        assert_eq!(convert_numbers("电话13800"), "电话一三八零零");
    }

    #[test]
    fn test_convert_plain_number_reads_place_value() {
        assert_eq!(convert_numbers("他有100块"), "他有一百块");
        assert_eq!(convert_numbers("第3集"), "第三集");
    }

    #[test]
    fn test_convert_leaves_text_alone() {
        assert_eq!(convert_numbers("没有数字的句子"), "没有数字的句子");
    }
}
