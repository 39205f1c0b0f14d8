//! 终止策略
//!
//! 决定何时停止对一条流调用分类器。终止在一个接入周期内只发生一次，
//! 之后只有重新检查才能再次接入。

use crate::classifier::ThirdPartyModule;
use crate::core::app_id::AppId;
use crate::core::session::{FlowSession, SessionFlag};

/// 释放流上的分类器会话
///
/// 会话按值交还给模块，流上不再持有它。返回是否真的释放了一个会话。
pub fn release_tp_session(
    flow: &mut FlowSession,
    module: Option<&dyn ThirdPartyModule>,
    core_only: bool,
) -> bool {
    let Some(session) = flow.take_tp_session() else {
        return false;
    };
    if let Some(module) = module {
        module.session_delete(session, core_only);
    }
    true
}

/// 是否满足终止条件
pub fn should_terminate(flow: &FlowSession, tp_packets: u16, max_tp_flow_depth: u16) -> bool {
    if flow.is_tp_done() {
        return false;
    }

    if tp_packets >= max_tp_flow_depth {
        return true;
    }

    if !flow
        .flags()
        .contains_all(&[SessionFlag::HttpSession, SessionFlag::AppReinspect])
    {
        return false;
    }

    flow.http_session().is_some_and(|http| {
        http.uri().is_some() && (http.chp_candidate().is_none() || http.is_chp_finished())
    })
}

/// 终止的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// 是否释放了分类器会话
    pub released: bool,
}

/// 检查并执行终止
///
/// 仍为"无"的第三方应用和负载应用被置为"未知"，然后释放分类器会话。
pub fn check_terminate(
    flow: &mut FlowSession,
    tp_packets: u16,
    max_tp_flow_depth: u16,
    module: Option<&dyn ThirdPartyModule>,
) -> Option<Termination> {
    if !should_terminate(flow, tp_packets, max_tp_flow_depth) {
        return None;
    }

    if flow.tp_app_id.is_none() {
        flow.tp_app_id = AppId::Unknown;
    }
    if flow.payload_app_id.is_none() {
        flow.payload_app_id = AppId::Unknown;
    }

    let released = release_tp_session(flow, module, true);
    flow.set_tp_done();
    Some(Termination { released })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TpSession;
    use crate::core::http_session::FieldValue;
    use crate::core::http_session::HttpField;

    #[test]
    fn test_depth_termination() {
        let mut flow = FlowSession::new();
        flow.install_tp_session(TpSession::new(()));

        assert!(check_terminate(&mut flow, 4, 5, None).is_none());
        let done = check_terminate(&mut flow, 5, 5, None).unwrap();
        assert!(done.released);
        assert_eq!(flow.tp_app_id, AppId::Unknown);
        assert_eq!(flow.payload_app_id, AppId::Unknown);
        assert!(!flow.has_tp_session());
        assert!(flow.is_tp_done());

        // 同一周期内不再触发
        assert!(check_terminate(&mut flow, 6, 5, None).is_none());
    }

    #[test]
    fn test_known_identity_kept() {
        let mut flow = FlowSession::new();
        flow.payload_app_id = AppId::Id(3000);
        check_terminate(&mut flow, 5, 5, None).unwrap();
        assert_eq!(flow.payload_app_id, AppId::Id(3000));
        assert_eq!(flow.tp_app_id, AppId::Unknown);
    }

    #[test]
    fn test_http_reinspect_termination() {
        let mut flow = FlowSession::new();
        flow.set_flag(SessionFlag::HttpSession);
        flow.set_flag(SessionFlag::AppReinspect);
        assert!(!should_terminate(&flow, 1, 5));

        flow.http_session_mut().set_field(HttpField::Uri, FieldValue::text("/a"));
        assert!(should_terminate(&flow, 1, 5));

        flow.http_session_mut().set_chp_candidate(Some(AppId::Id(9)));
        assert!(!should_terminate(&flow, 1, 5));

        flow.http_session_mut().finish_chp(false);
        assert!(should_terminate(&flow, 1, 5));
    }
}
