//! 基于URL的应用查找
//!
//! RTMP/RTSP流在拿到URL后，通过URL（以及可选的Referer）查找对应的
//! 客户端、服务和负载应用。

use crate::core::app_id::AppId;

/// 一次URL查找的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrlMatch {
    /// 客户端应用
    pub client: AppId,
    /// 服务应用
    pub service: AppId,
    /// 负载应用
    pub payload: AppId,
    /// 被引用的负载应用
    pub referred_payload: AppId,
}

/// URL匹配器
pub trait UrlMatcher: Send {
    /// 按URL查找，`referer` 为 `Some` 时同时用它归因被引用的负载
    fn lookup(&self, url: &str, referer: Option<&str>) -> Option<UrlMatch>;
}

/// 不匹配任何URL的匹配器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUrlMatcher;

impl UrlMatcher for NoUrlMatcher {
    fn lookup(&self, _url: &str, _referer: Option<&str>) -> Option<UrlMatch> {
        None
    }
}

/// 一条URL模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// 主机后缀，按标签边界匹配
    pub host_suffix: String,
    /// 路径前缀
    pub path_prefix: String,
    /// 命中时的应用
    pub apps: UrlMatch,
}

impl UrlPattern {
    /// 创建模式，主机后缀不区分大小写
    pub fn new<H: Into<String>>(host_suffix: H, apps: UrlMatch) -> Self {
        Self {
            host_suffix: host_suffix.into().to_ascii_lowercase(),
            path_prefix: "/".to_string(),
            apps,
        }
    }

    /// 设置路径前缀
    pub fn with_path_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        let host_ok = host == self.host_suffix
            || host
                .strip_suffix(self.host_suffix.as_str())
                .is_some_and(|rest| rest.ends_with('.'));
        host_ok && path.starts_with(self.path_prefix.as_str())
    }
}

/// 按顺序匹配的URL模式表，路径前缀越长优先级越高
#[derive(Debug, Clone, Default)]
pub struct UrlPatternTable {
    patterns: Vec<UrlPattern>,
}

impl UrlPatternTable {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模式
    pub fn add(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    /// 链式添加模式
    pub fn with_pattern(mut self, pattern: UrlPattern) -> Self {
        self.add(pattern);
        self
    }

    /// 模式数量
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn best_match(&self, url: &str) -> Option<&UrlPattern> {
        let (host, path) = split_url(url)?;
        self.patterns
            .iter()
            .filter(|p| p.matches(&host, path))
            .max_by_key(|p| (p.host_suffix.len(), p.path_prefix.len()))
    }
}

impl UrlMatcher for UrlPatternTable {
    fn lookup(&self, url: &str, referer: Option<&str>) -> Option<UrlMatch> {
        let mut found = self.best_match(url)?.apps;
        if let Some(referer) = referer {
            if let Some(referred) = self.best_match(referer) {
                found.referred_payload = referred.apps.payload;
            }
        }
        Some(found)
    }
}

/// 拆出小写主机名和路径，缺少scheme时把整个字符串当作 `host/path`
pub fn split_url(url: &str) -> Option<(String, &str)> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host.to_ascii_lowercase(), path))
}
