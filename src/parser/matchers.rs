use regex::Regex;

use super::cleaner::chinese_to_number;
use crate::model::Part;

/// 匹配结果
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub value: u32,
    pub matched_text: String,
    pub start_pos: usize,
    pub end_pos: usize,
    pub part: Option<Part>,
}

/// 匹配器 trait - 责任链中的一环
pub trait Matcher: Send + Sync {
    fn try_match(&self, text: &str) -> Option<MatchResult>;

    fn priority(&self) -> u32;

    /// 用于调试
    fn name(&self) -> &str;
}

/// 责任链管理器
pub struct MatcherChain {
    matchers: Vec<Box<dyn Matcher>>,
}

impl MatcherChain {
    pub fn new() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    pub fn add_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matchers.push(matcher);
        // 按优先级排序
        self.matchers.sort_by_key(|m| m.priority());
        self
    }

    /// 执行匹配链，返回第一个成功的匹配
    pub fn execute(&self, text: &str, exclude_positions: &[(usize, usize)]) -> Option<MatchResult> {
        for matcher in &self.matchers {
            if let Some(result) = matcher.try_match(text) {
                // 检查是否与排除位置重叠
                let overlaps = exclude_positions
                    .iter()
                    .any(|(start, end)| result.start_pos < *end && result.end_pos > *start);

                if !overlaps {
                    tracing::trace!(matcher = matcher.name(), value = result.value, "matched");
                    return Some(result);
                }
            }
        }
        None
    }

    /// 季度匹配链：第N季 → Season N → S2
    pub fn seasons() -> Self {
        Self::new()
            .add_matcher(Box::new(ChineseSeasonMatcher::new()))
            .add_matcher(Box::new(SeasonWordMatcher::new()))
            .add_matcher(Box::new(SeasonNumberMatcher::new()))
    }

    /// 集数匹配链：E01/EP01 → 第N期/集/话[上中下] → 开头数字 → 结尾数字
    pub fn episodes() -> Self {
        Self::new()
            .add_matcher(Box::new(EpMatcher::new()))
            .add_matcher(Box::new(ChineseEpisodeMatcher::new()))
            .add_matcher(Box::new(LeadingNumberMatcher::new()))
            .add_matcher(Box::new(TrailingNumberMatcher::new()))
    }
}

impl Default for MatcherChain {
    fn default() -> Self {
        Self::new()
    }
}

fn number_result(cap: &regex::Captures, group: usize, value: u32) -> Option<MatchResult> {
    let num_match = cap.get(group)?;
    Some(MatchResult {
        value,
        matched_text: cap.get(0)?.as_str().to_string(),
        start_pos: num_match.start(),
        end_pos: num_match.end(),
        part: None,
    })
}

// ==================== 季度匹配器 ====================

/// S2, S04 等格式（前后不能紧贴字母或数字）
pub struct SeasonNumberMatcher {
    regex: Regex,
}

impl SeasonNumberMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"(?i)(?:^|[^a-z0-9])s(\d{1,2})(?:[^0-9e]|$)").unwrap(),
        }
    }
}

impl Matcher for SeasonNumberMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = cap.get(1)?.as_str().parse::<u32>().ok()?;
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        3
    }
    fn name(&self) -> &str {
        "SeasonNumber(S2)"
    }
}

/// Season 3 格式
pub struct SeasonWordMatcher {
    regex: Regex,
}

impl SeasonWordMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"(?i)season[\s_\-]*(\d{1,2})").unwrap(),
        }
    }
}

impl Matcher for SeasonWordMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = cap.get(1)?.as_str().parse::<u32>().ok()?;
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        2
    }
    fn name(&self) -> &str {
        "SeasonWord(Season 3)"
    }
}

/// 第3季 / 第三季 / 第二部 格式
pub struct ChineseSeasonMatcher {
    regex: Regex,
}

impl ChineseSeasonMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"第\s*([零一二三四五六七八九十\d]{1,3})\s*[季部]").unwrap(),
        }
    }
}

impl Matcher for ChineseSeasonMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = chinese_to_number(cap.get(1)?.as_str())?;
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        1
    }
    fn name(&self) -> &str {
        "ChineseSeason(第3季)"
    }
}

// ==================== 集数匹配器 ====================

/// E12 / EP12 格式（E 前不能是字母）
pub struct EpMatcher {
    regex: Regex,
}

impl EpMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"(?i)(?:^|[^a-z])ep?\s*(\d{1,4})(?:\D|$)").unwrap(),
        }
    }
}

impl Matcher for EpMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = cap.get(1)?.as_str().parse::<u32>().ok()?;
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        1
    }
    fn name(&self) -> &str {
        "Ep(EP01)"
    }
}

/// 第11期 / 第01集 / 第三话，可带 上/中/下 分段
///
/// A part marker maps onto a fixed three-way split of the nominal episode:
/// `(n - 1) * 3 + offset + 1`. Same-day programmes split into more than
/// three pieces are not modelled.
pub struct ChineseEpisodeMatcher {
    regex: Regex,
}

impl ChineseEpisodeMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(
                r"第\s*([零一二三四五六七八九十百\d]{1,4})\s*[期集话話]\s*[（(]?\s*([上中下])?",
            )
            .unwrap(),
        }
    }
}

impl Matcher for ChineseEpisodeMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let base = chinese_to_number(cap.get(1)?.as_str())?;
            if base == 0 {
                return None;
            }
            let part = cap.get(2).and_then(|m| Part::from_marker(m.as_str()));
            let value = match part {
                Some(p) => (base - 1) * 3 + p.offset() + 1,
                None => base,
            };
            let mut result = number_result(&cap, 1, value)?;
            result.part = part;
            Some(result)
        })
    }

    fn priority(&self) -> u32 {
        2
    }
    fn name(&self) -> &str {
        "ChineseEpisode(第11期上)"
    }
}

/// 01.mp4 / 01 - 标题 开头数字
pub struct LeadingNumberMatcher {
    regex: Regex,
}

impl LeadingNumberMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"^\s*(\d{1,3})(?:[._\-\s]|$)").unwrap(),
        }
    }
}

impl Matcher for LeadingNumberMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = cap.get(1)?.as_str().parse::<u32>().ok()?;
            if value == 0 {
                return None;
            }
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        10
    }
    fn name(&self) -> &str {
        "Leading(01 - xx)"
    }
}

/// 小猪佩奇第八季中文22 结尾数字
pub struct TrailingNumberMatcher {
    regex: Regex,
}

impl TrailingNumberMatcher {
    pub fn new() -> Self {
        Self {
            regex: Regex::new(r"(?:^|\D)(\d{1,3})\s*$").unwrap(),
        }
    }
}

impl Matcher for TrailingNumberMatcher {
    fn try_match(&self, text: &str) -> Option<MatchResult> {
        self.regex.captures(text).and_then(|cap| {
            let value = cap.get(1)?.as_str().parse::<u32>().ok()?;
            if value == 0 {
                return None;
            }
            number_result(&cap, 1, value)
        })
    }

    fn priority(&self) -> u32 {
        20
    }
    fn name(&self) -> &str {
        "Trailing(xx22)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(text: &str) -> Option<u32> {
        MatcherChain::episodes().execute(text, &[]).map(|r| r.value)
    }

    fn season(text: &str) -> Option<u32> {
        MatcherChain::seasons().execute(text, &[]).map(|r| r.value)
    }

    #[test]
    fn test_season_chain() {
        assert_eq!(season("新闻女王 S2"), Some(2));
        assert_eq!(season("Season 10"), Some(10));
        assert_eq!(season("重影第一季"), Some(1));
        assert_eq!(season("老友记.第十季"), Some(10));
        assert_eq!(season("Game.of.Thrones.S08.2019.UHD"), Some(8));
        assert_eq!(season("Thrones"), None);
        assert_eq!(season("Show.S01E02"), None);
    }

    #[test]
    fn test_episode_token() {
        assert_eq!(episode("进击的巨人 E220"), Some(220));
        assert_eq!(episode("某番剧 EP01"), Some(1));
        assert_eq!(episode("episode01"), Some(1));
    }

    #[test]
    fn test_chinese_episode_with_part() {
        assert_eq!(episode("奔跑吧 第11期"), Some(11));
        assert_eq!(episode("奔跑吧 第1期上"), Some(1));
        assert_eq!(episode("奔跑吧 第1期下"), Some(3));
        assert_eq!(episode("奔跑吧 第2期(中)"), Some(5));
        assert_eq!(episode("番剧名 第三话"), Some(3));

        let result = MatcherChain::episodes().execute("第11期下", &[]).unwrap();
        assert_eq!(result.part, Some(Part::Last));
    }

    #[test]
    fn test_leading_and_trailing_numbers() {
        assert_eq!(episode("01 - 开端"), Some(1));
        assert_eq!(episode("小猪佩奇第八季中文22"), Some(22));
        assert_eq!(episode("无集数"), None);
    }

    #[test]
    fn test_exclude_positions() {
        let text = "Show 24";
        assert_eq!(episode(text), Some(24));
        assert_eq!(MatcherChain::episodes().execute(text, &[(5, 7)]), None);
    }

    #[test]
    fn test_priority_order() {
        // E token wins over trailing number
        assert_eq!(episode("Show E05 12"), Some(5));
    }
}
