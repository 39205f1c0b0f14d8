//! TLS ClientHello解析
//!
//! 从握手记录中取出服务器名称（SNI）和ALPN协议列表，
//! 数据不完整时尽量使用已有部分。

const RECORD_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_ALPN: u16 = 0x0010;
const SNI_HOST_NAME: u8 = 0x00;

/// ClientHello中提取的信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    /// 服务器名称
    pub server_name: Option<String>,
    /// ALPN协议列表
    pub alpn: Vec<String>,
}

/// 是否像一个TLS握手记录的开头
pub fn is_handshake_record(data: &[u8]) -> bool {
    data.len() >= 6
        && data[0] == RECORD_HANDSHAKE
        && data[1] == 0x03
        && data[2] <= 0x04
}

/// 是否为ServerHello
pub fn is_server_hello(data: &[u8]) -> bool {
    is_handshake_record(data) && data[5] == HANDSHAKE_SERVER_HELLO
}

/// 解析ClientHello
pub fn parse_client_hello(data: &[u8]) -> Option<ClientHello> {
    if !is_handshake_record(data) {
        return None;
    }

    let record_length = u16::from_be_bytes([data[3], data[4]]) as usize;
    let handshake = if data.len() < 5 + record_length {
        &data[5..]
    } else {
        &data[5..5 + record_length]
    };

    if handshake.first() != Some(&HANDSHAKE_CLIENT_HELLO) {
        return None;
    }

    // 握手类型(1) + 长度(3) + 版本(2) + 随机数(32)
    let mut pos = 1 + 3 + 2 + 32;

    let session_id_len = *handshake.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_suites_len = read_u16(handshake, pos)? as usize;
    pos += 2 + cipher_suites_len;

    let compression_len = *handshake.get(pos)? as usize;
    pos += 1 + compression_len;

    let extensions_len = read_u16(handshake, pos)? as usize;
    pos += 2;
    if pos > handshake.len() {
        return None;
    }
    let end = (pos + extensions_len).min(handshake.len());

    Some(parse_extensions(&handshake[pos..end]))
}

fn parse_extensions(extensions: &[u8]) -> ClientHello {
    let mut hello = ClientHello::default();
    let mut pos = 0;

    while pos + 4 <= extensions.len() {
        let ext_type = u16::from_be_bytes([extensions[pos], extensions[pos + 1]]);
        let ext_len = u16::from_be_bytes([extensions[pos + 2], extensions[pos + 3]]) as usize;
        pos += 4;
        if pos + ext_len > extensions.len() {
            break;
        }
        let body = &extensions[pos..pos + ext_len];

        match ext_type {
            EXT_SERVER_NAME => hello.server_name = parse_server_name(body),
            EXT_ALPN => hello.alpn = parse_alpn_list(body),
            _ => {}
        }
        pos += ext_len;
    }

    hello
}

fn parse_server_name(body: &[u8]) -> Option<String> {
    let list_len = read_u16(body, 0)? as usize;
    let list = body.get(2..2 + list_len)?;
    let mut pos = 0;

    while pos + 3 <= list.len() {
        let name_type = list[pos];
        let name_len = u16::from_be_bytes([list[pos + 1], list[pos + 2]]) as usize;
        pos += 3;
        let name = list.get(pos..pos + name_len)?;
        if name_type == SNI_HOST_NAME {
            return std::str::from_utf8(name).ok().map(str::to_ascii_lowercase);
        }
        pos += name_len;
    }
    None
}

fn parse_alpn_list(body: &[u8]) -> Vec<String> {
    let mut protocols = Vec::new();
    let Some(list_len) = read_u16(body, 0) else {
        return protocols;
    };
    let Some(list) = body.get(2..2 + list_len as usize) else {
        return protocols;
    };

    let mut pos = 0;
    while pos < list.len() {
        let len = list[pos] as usize;
        pos += 1;
        let Some(name) = list.get(pos..pos + len) else {
            break;
        };
        protocols.push(String::from_utf8_lossy(name).into_owned());
        pos += len;
    }
    protocols
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// 构造一个最小的ClientHello记录
///
/// 只用于测试和演示。
pub fn build_client_hello(server_name: Option<&str>, alpn: &[&str]) -> Vec<u8> {
    let mut extensions = Vec::new();

    if let Some(name) = server_name {
        let name = name.as_bytes();
        let entry_len = 3 + name.len();
        extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&((entry_len + 2) as u16).to_be_bytes());
        extensions.extend_from_slice(&(entry_len as u16).to_be_bytes());
        extensions.push(SNI_HOST_NAME);
        extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
        extensions.extend_from_slice(name);
    }

    if !alpn.is_empty() {
        let list: Vec<u8> = alpn
            .iter()
            .flat_map(|p| std::iter::once(p.len() as u8).chain(p.bytes()))
            .collect();
        extensions.extend_from_slice(&EXT_ALPN.to_be_bytes());
        extensions.extend_from_slice(&((list.len() + 2) as u16).to_be_bytes());
        extensions.extend_from_slice(&(list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&list);
    }

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0u8; 32]);
    body.push(0); // session id
    body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![RECORD_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
