//! 数据包视图
//!
//! 由抓包/重组层提供的单个数据包的只读视图。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// 数据包方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// 来自连接发起方
    FromInitiator,
    /// 来自响应方
    FromResponder,
}

impl Direction {
    /// 是否来自发起方
    pub fn is_initiator(&self) -> bool {
        matches!(self, Self::FromInitiator)
    }
}

/// 传输层协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// 其他协议号
    Other(u8),
}

impl IpProtocol {
    /// 协议号
    pub fn number(&self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(n) => *n,
        }
    }
}

/// 流重组给出的顺序判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StreamOrder {
    /// 尚未判断
    #[default]
    Unknown,
    /// 顺序正确
    Ok,
    /// 乱序
    Bad,
}

/// 宿主为流指定的服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowService {
    /// 普通流
    #[default]
    Other,
    /// FTP数据通道
    FtpData,
}

/// 数据包
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// 负载
    pub data: &'a [u8],
    /// 传输协议
    pub protocol: IpProtocol,
    /// 源地址
    pub src_ip: IpAddr,
    /// 源端口
    pub src_port: u16,
    /// 目的地址
    pub dst_ip: IpAddr,
    /// 目的端口
    pub dst_port: u16,
    /// IP服务类型字段
    pub tos: u8,
    /// 流顺序
    pub order: StreamOrder,
    /// 流的服务类型
    pub flow_service: FlowService,
}

impl<'a> Packet<'a> {
    /// 创建TCP数据包，地址默认为本地回环
    pub fn tcp(data: &'a [u8], src_port: u16, dst_port: u16) -> Self {
        Self {
            data,
            protocol: IpProtocol::Tcp,
            src_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            src_port,
            dst_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dst_port,
            tos: 0,
            order: StreamOrder::Ok,
            flow_service: FlowService::Other,
        }
    }

    /// 创建UDP数据包
    pub fn udp(data: &'a [u8], src_port: u16, dst_port: u16) -> Self {
        Self {
            protocol: IpProtocol::Udp,
            order: StreamOrder::Unknown,
            ..Self::tcp(data, src_port, dst_port)
        }
    }

    /// 设置地址
    pub fn with_addrs(mut self, src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        self.src_ip = src_ip;
        self.dst_ip = dst_ip;
        self
    }

    /// 设置流顺序
    pub fn with_order(mut self, order: StreamOrder) -> Self {
        self.order = order;
        self
    }

    /// 设置服务类型字段
    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// 设置流服务
    pub fn with_flow_service(mut self, service: FlowService) -> Self {
        self.flow_service = service;
        self
    }

    /// 负载长度
    pub fn dsize(&self) -> usize {
        self.data.len()
    }

    /// 按方向取服务端端点
    pub fn server_endpoint(&self, direction: Direction) -> (IpAddr, u16) {
        match direction {
            Direction::FromInitiator => (self.dst_ip, self.dst_port),
            Direction::FromResponder => (self.src_ip, self.src_port),
        }
    }
}

impl fmt::Display for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} {} {}",
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.protocol.number()
        )
    }
}
