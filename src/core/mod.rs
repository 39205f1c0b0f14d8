//! 核心数据模型
//!
//! 应用标识、流会话记录、HTTP/TLS属性以及分类器属性结果。

pub mod app_id;
pub mod app_info;
pub mod attributes;
pub mod header;
pub mod http_session;
pub mod packet;
pub mod session;
pub mod tls;

pub use app_id::AppId;
pub use app_info::{AppInfoFlag, AppInfoTable};
pub use attributes::{AttributeData, XffField};
pub use http_session::{ChpState, FieldRange, FieldValue, HttpField, HttpSession};
pub use packet::{Direction, FlowService, IpProtocol, Packet, StreamOrder};
pub use session::{FlowSession, ScanFlag, ScanFlags, SessionFlag, SessionFlags};
pub use tls::TlsSession;
