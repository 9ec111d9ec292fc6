//! 请求分类：是否需要走两阶段（收集 → 规划）流水线
//!
//! 固定的中英文关键词表，大小写不敏感的子串匹配，命中任意一个即视为规划请求。

pub const PLANNING_KEYWORDS: &[&str] = &[
    "旅行", "旅游", "出行", "行程", "规划", "计划", "机票", "酒店", "住宿", "景点", "路线",
    "travel", "trip", "vacation", "itinerary", "plan", "flight", "hotel", "attraction", "route",
];

/// 请求是否属于规划类
pub fn is_planning_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLANNING_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_requests() {
        assert!(is_planning_request("请帮我规划行程"));
        assert!(is_planning_request("plan my itinerary"));
        assert!(is_planning_request("Any cheap FLIGHTS to Tokyo?"));
    }

    #[test]
    fn test_non_planning_requests() {
        assert!(!is_planning_request("what's the weather"));
        assert!(!is_planning_request("写一首关于春天的诗"));
        assert!(!is_planning_request(""));
    }
}
