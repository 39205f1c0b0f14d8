//! 命名头部查找
//!
//! 在已重组的头部缓冲区中按名称切出一个头部的值。

/// 在缓冲区中查找头部
///
/// 头部名称不区分大小写，必须位于行首并紧跟 `": "`；
/// 返回的值去掉了行尾的空白。
pub fn find_header<'a>(buf: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let key = name.as_bytes();
    let mut line_start = 0;

    loop {
        let rest = &buf[line_start..];
        if rest.len() < key.len() {
            return None;
        }

        if rest[..key.len()].eq_ignore_ascii_case(key) && rest[key.len()..].starts_with(b": ") {
            let value = &rest[key.len() + 2..];
            let end = value.iter().position(|&b| b == b'\n').unwrap_or(value.len());
            let mut line = &value[..end];
            while let Some((last, head)) = line.split_last() {
                if !last.is_ascii_whitespace() {
                    break;
                }
                line = head;
            }
            return Some(line);
        }

        let next = rest.iter().position(|&b| b == b'\n')?;
        line_start += next + 1;
    }
}

/// 头部切片规则
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOption {
    name: Option<String>,
}

impl HeaderOption {
    /// 选取整个头部缓冲区
    pub fn any() -> Self {
        Self { name: None }
    }

    /// 只选取指定名称的头部
    pub fn named<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() { None } else { Some(name) },
        }
    }

    /// 头部名称
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 对缓冲区求值，返回选中的字节
    pub fn eval<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        match &self.name {
            None => Some(buf),
            Some(name) => find_header(buf, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: &[u8] = b"Host: example.com\r\nUser-Agent: curl/8.0  \r\nX-Empty: \r\nCookie: a=b";

    #[test]
    fn test_find_case_insensitive() {
        assert_eq!(find_header(HEADERS, "host"), Some(&b"example.com"[..]));
        assert_eq!(find_header(HEADERS, "USER-AGENT"), Some(&b"curl/8.0"[..]));
    }

    #[test]
    fn test_last_line_without_newline() {
        assert_eq!(find_header(HEADERS, "Cookie"), Some(&b"a=b"[..]));
    }

    #[test]
    fn test_empty_value_and_missing() {
        assert_eq!(find_header(HEADERS, "X-Empty"), Some(&b""[..]));
        assert_eq!(find_header(HEADERS, "Referer"), None);
    }

    #[test]
    fn test_requires_separator_at_line_start() {
        let buf = b"X-Host: nope\r\nHostname: nope\r\n";
        assert_eq!(find_header(buf, "Host"), None);
    }

    #[test]
    fn test_option_without_name_selects_all() {
        assert_eq!(HeaderOption::any().eval(HEADERS), Some(HEADERS));
        assert_eq!(HeaderOption::named("").eval(HEADERS), Some(HEADERS));
        assert_eq!(
            HeaderOption::named("host").eval(HEADERS),
            Some(&b"example.com"[..])
        );
    }
}
