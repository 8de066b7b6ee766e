use once_cell::sync::Lazy;
use regex::Regex;

/// 地区代码与中文名称，按匹配优先级排列
const REGIONS: [(&str, &str); 20] = [
    ("HK", "香港"),
    ("TW", "台湾"),
    ("JP", "日本"),
    ("SG", "新加坡"),
    ("US", "美国"),
    ("UK", "英国"),
    ("KR", "韩国"),
    ("DE", "德国"),
    ("CA", "加拿大"),
    ("IN", "印度"),
    ("MY", "马来西亚"),
    ("TR", "土耳其"),
    ("AR", "阿根廷"),
    ("RU", "俄罗斯"),
    ("VN", "越南"),
    ("UA", "乌克兰"),
    ("NG", "尼日利亚"),
    ("FR", "法国"),
    ("AU", "澳大利亚"),
    ("BR", "巴西"),
];

/// 英文代码必须独立出现（"HK-01"、"[JP] 东京"），避免 "RUSSIA" 命中 "US"
static REGION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    REGIONS
        .iter()
        .filter_map(|(code, cn)| {
            let pattern = format!(r"{}|(?:^|[^A-Za-z]){}(?:[^A-Za-z]|$)", cn, code);
            match Regex::new(&pattern) {
                Ok(re) => Some((*code, re)),
                Err(e) => {
                    log::error!("Invalid region pattern for {}: {}", code, e);
                    None
                }
            }
        })
        .collect()
});

/// 从节点名称识别地区代码
pub fn extract_region(name: &str) -> Option<&'static str> {
    REGION_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(name))
        .map(|(code, _)| *code)
}

/// 地区代理组名称
pub fn region_group_name(code: &str) -> String {
    format!("{} 地区", code)
}
